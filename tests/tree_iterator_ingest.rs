use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use doms_ingester::contract::{DatastreamWrite, MockObjectStore, RelationWrite};
use doms_ingester::event::ParsingEvent;
use doms_ingester::ingest::{HAS_FILE_RELATION, HAS_PART_RELATION};
use doms_ingester::tree_iterator::{ClassificationPolicy, FileSystemTreeIterator};
use doms_ingester::TreeIngester;
use tempfile::tempdir;

/// B1/
///   B1.batch.xml
///   film-1/
///     film-1.film.xml (+ .md5)
///     page-0001.jp2
///     page-0001.alto.xml
///     page-0001.mix.xml
fn write_batch(root: &Path) {
    let film = root.join("film-1");
    fs::create_dir_all(&film).unwrap();
    fs::write(root.join("B1.batch.xml"), "<batch/>").unwrap();
    fs::write(film.join("film-1.film.xml"), "<film/>").unwrap();
    fs::write(film.join("film-1.film.xml.md5"), "ABCDEF0123  film-1.film.xml\n").unwrap();
    fs::write(film.join("page-0001.jp2"), [0u8, 1, 2, 3]).unwrap();
    fs::write(film.join("page-0001.alto.xml"), "<alto/>").unwrap();
    fs::write(film.join("page-0001.mix.xml"), "<mix/>").unwrap();
}

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
fn walk_groups_files_and_picks_up_checksums() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("B1");
    write_batch(&root);

    let events: Vec<String> = FileSystemTreeIterator::new(&root, ClassificationPolicy::newspaper())
        .map(|event| describe(&event.expect("walk should succeed")))
        .collect();

    assert_eq!(
        events,
        vec![
            "begin B1 false",
            "begin B1/B1 false",
            "attr B1/B1.batch.xml None",
            "end B1/B1",
            "begin B1/film-1 false",
            "begin B1/film-1/film-1 false",
            "attr B1/film-1/film-1.film.xml Some(\"ABCDEF0123\")",
            "end B1/film-1/film-1",
            "begin B1/film-1/page-0001 true",
            "attr B1/film-1/page-0001.alto.xml None",
            "attr B1/film-1/page-0001.jp2/contents None",
            "attr B1/film-1/page-0001.mix.xml None",
            "end B1/film-1/page-0001",
            "end B1/film-1",
            "end B1",
        ]
    );
}

#[test]
fn custom_policy_changes_data_file_classification() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("B1");
    write_batch(&root);
    let policy = ClassificationPolicy {
        data_file_suffixes: vec![".mix.xml".to_string()],
        checksum_suffix: ".md5".to_string(),
    };

    let begins: Vec<String> = FileSystemTreeIterator::new(&root, policy)
        .map(|event| event.unwrap())
        .filter_map(|event| match event {
            ParsingEvent::NodeBegin {
                name,
                is_data_file_node: true,
            } => Some(name),
            _ => None,
        })
        .collect();
    assert_eq!(begins, vec!["B1/film-1/page-0001"]);
}

#[test]
fn directory_and_file_group_with_same_name_are_rejected() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("B1");
    fs::create_dir_all(root.join("film-1")).unwrap();
    fs::write(root.join("film-1.film.xml"), "<film/>").unwrap();

    let mut walk = FileSystemTreeIterator::new(&root, ClassificationPolicy::newspaper());
    let err = walk
        .next()
        .expect("walk yields an item")
        .expect_err("clashing node names must fail");
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    assert!(err.to_string().contains("B1/film-1"), "got: {err}");
    assert!(walk.next().is_none());
}

#[tokio::test]
async fn batch_directory_is_ingested_end_to_end() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("B1");
    write_batch(&root);

    let datastreams: Arc<Mutex<Vec<DatastreamWrite>>> = Arc::default();
    let relations: Arc<Mutex<Vec<RelationWrite>>> = Arc::default();

    let mut store = MockObjectStore::new();
    store
        .expect_new_empty_object()
        .times(5)
        .returning(|req| Ok(req.old_ids[0].replacen("path:", "uuid:", 1)));
    let ds = datastreams.clone();
    store.expect_modify_datastream_by_value().returning(move |req| {
        ds.lock().unwrap().push(req);
        Ok(())
    });
    let rel = relations.clone();
    store.expect_add_relation().returning(move |req| {
        rel.lock().unwrap().push(req);
        Ok(())
    });

    let ingester = TreeIngester::new(&store, vec!["doms:Newspaper_Collection".to_string()]);
    let report = ingester
        .ingest_with_report(FileSystemTreeIterator::new(&root, ClassificationPolicy::newspaper()))
        .await
        .expect("ingest should succeed");

    assert_eq!(report.root_pid, "uuid:B1");
    assert_eq!(report.objects_created, 5);
    assert_eq!(report.datastreams_written, 4);
    assert_eq!(report.attributes_skipped, 1);
    assert_eq!(report.relations_written, 4);

    let datastreams = datastreams.lock().unwrap();
    let film = datastreams
        .iter()
        .find(|write| write.datastream == "FILM")
        .expect("film metadata written");
    assert_eq!(film.pid, "uuid:B1/film-1/film-1");
    assert_eq!(film.content, "<film/>");
    assert_eq!(film.checksum.as_deref(), Some("abcdef0123"));

    let alto = datastreams
        .iter()
        .find(|write| write.datastream == "ALTO")
        .expect("alto written");
    assert_eq!(alto.pid, "uuid:B1/film-1/page-0001");
    assert_eq!(alto.checksum, None);

    let relations = relations.lock().unwrap();
    assert!(relations.iter().all(|r| r.predicate == HAS_PART_RELATION));
    assert!(!relations.iter().any(|r| r.predicate == HAS_FILE_RELATION));
    let film_children: Vec<&str> = relations
        .iter()
        .filter(|r| r.subject == "uuid:B1/film-1")
        .map(|r| r.object.as_str())
        .collect();
    assert_eq!(
        film_children,
        vec!["uuid:B1/film-1/film-1", "uuid:B1/film-1/page-0001"]
    );
}
