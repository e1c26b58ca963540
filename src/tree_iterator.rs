//! Filesystem event source: walks a batch directory and yields [`ParsingEvent`]s.
//!
//! Directories become nodes. Inside a directory, files sharing a prefix (the
//! file name up to its first `.`) are grouped into a virtual node named
//! `<dir>/<prefix>`; the group is a data-file node when one of its files has a
//! data-file suffix. Data files are reported as `<file>/contents` markers,
//! every other file as an attribute carrying its content and, when a sibling
//! checksum file exists, its checksum.
//!
//! The walk keeps one sorted listing per open directory and nothing else.

use std::collections::{BTreeMap, VecDeque};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, error};

use crate::event::{AttributeEvent, ParsingEvent, CONTENTS_SUFFIX};

/// Decides which files are data files and where their checksums live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationPolicy {
    pub data_file_suffixes: Vec<String>,
    pub checksum_suffix: String,
}

impl ClassificationPolicy {
    /// Newspaper batches: JPEG2000 page scans with `.md5` checksum files.
    pub fn newspaper() -> Self {
        Self {
            data_file_suffixes: vec![".jp2".to_string()],
            checksum_suffix: ".md5".to_string(),
        }
    }

    pub fn is_data_file(&self, file_name: &str) -> bool {
        self.data_file_suffixes
            .iter()
            .any(|suffix| file_name.ends_with(suffix.as_str()))
    }

    pub fn is_checksum_file(&self, file_name: &str) -> bool {
        !self.checksum_suffix.is_empty() && file_name.ends_with(self.checksum_suffix.as_str())
    }
}

impl Default for ClassificationPolicy {
    fn default() -> Self {
        Self::newspaper()
    }
}

/// A child of a directory still waiting to be walked.
#[derive(Debug)]
enum Entry {
    Directory { path: PathBuf, name: String },
    Group { name: String, files: Vec<PathBuf> },
}

#[derive(Debug)]
struct OpenDirectory {
    name: String,
    entries: VecDeque<Entry>,
}

/// Events of an expanded file group, materialised one at a time.
#[derive(Debug)]
enum Queued {
    End { name: String },
    Contents { name: String },
    File { name: String, path: PathBuf },
}

/// Depth-first iterator over a batch directory.
pub struct FileSystemTreeIterator {
    root: Option<PathBuf>,
    policy: ClassificationPolicy,
    stack: Vec<OpenDirectory>,
    queued: VecDeque<Queued>,
    failed: bool,
}

impl FileSystemTreeIterator {
    pub fn new(root: impl Into<PathBuf>, policy: ClassificationPolicy) -> Self {
        Self {
            root: Some(root.into()),
            policy,
            stack: Vec::new(),
            queued: VecDeque::new(),
            failed: false,
        }
    }

    fn begin_root(&mut self, root: PathBuf) -> io::Result<ParsingEvent> {
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("batch root {} has no directory name", root.display()),
                )
            })?;
        self.begin_directory(&root, name)
    }

    fn begin_directory(&mut self, path: &Path, name: String) -> io::Result<ParsingEvent> {
        let entries = self.list_directory(path, &name)?;
        debug!(name = %name, entries = entries.len(), "Entering directory");
        self.stack.push(OpenDirectory { name: name.clone(), entries });
        Ok(ParsingEvent::node_begin(name, false))
    }

    fn list_directory(&self, path: &Path, name: &str) -> io::Result<VecDeque<Entry>> {
        let mut directories: BTreeMap<String, PathBuf> = BTreeMap::new();
        let mut groups: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();

        for dir_entry in fs::read_dir(path)? {
            let dir_entry = dir_entry?;
            let file_name = dir_entry.file_name().to_string_lossy().into_owned();
            if dir_entry.file_type()?.is_dir() {
                directories.insert(file_name, dir_entry.path());
            } else if !self.policy.is_checksum_file(&file_name) {
                let prefix = file_name.split('.').next().unwrap_or_default().to_string();
                groups.entry(prefix).or_default().push(dir_entry.path());
            }
        }

        // Both would become the node `<name>/<key>` and share one path identifier
        if let Some(clash) = groups.keys().find(|prefix| directories.contains_key(*prefix)) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "directory {name}/{clash} collides with file group {name}/{clash}.* in {}",
                    path.display()
                ),
            ));
        }

        let mut keyed: Vec<(String, Entry)> = Vec::with_capacity(directories.len() + groups.len());
        for (file_name, dir_path) in directories {
            keyed.push((
                file_name.clone(),
                Entry::Directory {
                    path: dir_path,
                    name: format!("{name}/{file_name}"),
                },
            ));
        }
        for (prefix, mut files) in groups {
            files.sort();
            keyed.push((
                prefix.clone(),
                Entry::Group {
                    name: format!("{name}/{prefix}"),
                    files,
                },
            ));
        }
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(keyed.into_iter().map(|(_, entry)| entry).collect())
    }

    /// Queue the attribute and end events of a group and return its begin event.
    fn begin_group(&mut self, name: String, files: Vec<PathBuf>) -> ParsingEvent {
        let parent = name.rsplit_once('/').map(|(parent, _)| parent).unwrap_or_default();
        let mut is_data_file_node = false;

        for path in files {
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let attribute_name = format!("{parent}/{file_name}");
            if self.policy.is_data_file(&file_name) {
                is_data_file_node = true;
                self.queued.push_back(Queued::Contents {
                    name: format!("{attribute_name}{CONTENTS_SUFFIX}"),
                });
            } else {
                self.queued.push_back(Queued::File {
                    name: attribute_name,
                    path,
                });
            }
        }
        self.queued.push_back(Queued::End { name: name.clone() });
        ParsingEvent::node_begin(name, is_data_file_node)
    }

    fn materialise(&self, queued: Queued) -> io::Result<ParsingEvent> {
        match queued {
            Queued::End { name } => Ok(ParsingEvent::node_end(name)),
            Queued::Contents { name } => Ok(ParsingEvent::Attribute(AttributeEvent::new(
                name,
                Box::new(io::empty()),
                None,
            ))),
            Queued::File { name, path } => {
                let checksum = self.read_checksum(&path)?;
                let data = File::open(&path)?;
                Ok(ParsingEvent::Attribute(AttributeEvent::new(
                    name,
                    Box::new(data),
                    checksum,
                )))
            }
        }
    }

    /// First whitespace-separated token of `<file><checksum suffix>`, if that file exists.
    fn read_checksum(&self, path: &Path) -> io::Result<Option<String>> {
        if self.policy.checksum_suffix.is_empty() {
            return Ok(None);
        }
        let mut checksum_path = path.as_os_str().to_owned();
        checksum_path.push(&self.policy.checksum_suffix);
        let checksum_path = PathBuf::from(checksum_path);
        if !checksum_path.is_file() {
            return Ok(None);
        }
        let text = fs::read_to_string(&checksum_path)?;
        Ok(text.split_whitespace().next().map(str::to_string))
    }

    fn advance(&mut self) -> Option<io::Result<ParsingEvent>> {
        if let Some(root) = self.root.take() {
            return Some(self.begin_root(root));
        }
        if let Some(queued) = self.queued.pop_front() {
            return Some(self.materialise(queued));
        }
        let top = self.stack.last_mut()?;
        match top.entries.pop_front() {
            Some(Entry::Directory { path, name }) => Some(self.begin_directory(&path, name)),
            Some(Entry::Group { name, files }) => Some(Ok(self.begin_group(name, files))),
            None => {
                let closed = self.stack.pop()?;
                Some(Ok(ParsingEvent::node_end(closed.name)))
            }
        }
    }
}

impl Iterator for FileSystemTreeIterator {
    type Item = io::Result<ParsingEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let next = self.advance();
        if let Some(Err(e)) = &next {
            error!(error = ?e, "Walking batch directory failed");
            self.failed = true;
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn describe(event: &ParsingEvent) -> String {
        match event {
            ParsingEvent::NodeBegin {
                name,
                is_data_file_node,
            } => format!("begin {name} {is_data_file_node}"),
            ParsingEvent::NodeEnd { name } => format!("end {name}"),
            ParsingEvent::Attribute(attr) => format!("attr {} {:?}", attr.name, attr.checksum),
        }
    }

    #[test]
    fn policy_classifies_by_suffix() {
        let policy = ClassificationPolicy::newspaper();
        assert!(policy.is_data_file("page-0007B.jp2"));
        assert!(!policy.is_data_file("page-0007B.alto.xml"));
        assert!(policy.is_checksum_file("page-0007B.alto.xml.md5"));
    }

    #[test]
    fn empty_directory_yields_begin_and_end() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("B1");
        fs::create_dir(&root).unwrap();

        let events: Vec<String> = FileSystemTreeIterator::new(&root, ClassificationPolicy::default())
            .map(|e| describe(&e.unwrap()))
            .collect();
        assert_eq!(events, vec!["begin B1 false", "end B1"]);
    }

    #[test]
    fn missing_root_fails_once() {
        let dir = tempdir().unwrap();
        let mut iter =
            FileSystemTreeIterator::new(dir.path().join("absent"), ClassificationPolicy::default());
        assert!(iter.next().unwrap().is_err());
        assert!(iter.next().is_none());
    }
}
