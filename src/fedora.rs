//! Fedora 3 REST implementation of [`ObjectStore`].
//!
//! Talks to a DOMS repository over HTTP with basic authentication. New pids
//! come from the DOMS PID generator when one is configured, otherwise they are
//! random `uuid:` pids.

use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::{Credentials, FedoraSettings};
use crate::contract::{DatastreamWrite, NewObject, ObjectStore, RelationWrite, StoreError};

/// Relation linking a new object to each of its collections.
pub const IS_PART_OF_COLLECTION_RELATION: &str =
    "http://doms.statsbiblioteket.dk/relations/default/0/1/#isPartOfCollection";

const FEDORA_URI_PREFIX: &str = "info:fedora/";

pub struct FedoraClient {
    http: Client,
    settings: FedoraSettings,
    credentials: Credentials,
}

impl FedoraClient {
    pub fn new(settings: FedoraSettings, credentials: Credentials) -> Result<Self, StoreError> {
        let http = Client::builder()
            .build()
            .map_err(|e| StoreError::MethodFailed(format!("failed to build HTTP client: {e}")))?;
        info!(server_url = %settings.server_url, "Constructed Fedora client");
        Ok(Self {
            http,
            settings,
            credentials,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.settings.server_url.trim_end_matches('/'), path);
        debug!(method = %method, url = %url, "Fedora request");
        self.http
            .request(method, url)
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
    }

    /// Send the request and return the body of a successful response.
    async fn execute(&self, request: RequestBuilder, context: &str) -> Result<String, StoreError> {
        let (status, body) = self.send(request, context).await?;
        if status.is_success() {
            Ok(body)
        } else {
            error!(status = %status, context, "Fedora returned error. Response body: {body}");
            Err(map_status(status, &body, context))
        }
    }

    async fn send(&self, request: RequestBuilder, context: &str) -> Result<(StatusCode, String), StoreError> {
        let response = request.send().await.map_err(|e| {
            error!(error = ?e, context, "Fedora request failed");
            StoreError::MethodFailed(format!("{context}: {e}"))
        })?;
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<Failed to decode response body>"));
        Ok((status, body))
    }

    async fn generate_pid(&self) -> Result<String, StoreError> {
        let Some(generator) = &self.settings.pid_generator_url else {
            return Ok(format!("uuid:{}", Uuid::new_v4()));
        };
        let url = format!("{}/rest/pids/generatePid", generator.trim_end_matches('/'));
        let response = self
            .http
            .get(&url)
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .send()
            .await
            .map_err(|e| StoreError::PidGenerator(format!("{url}: {e}")))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| StoreError::PidGenerator(format!("{url}: {e}")))?;
        if !status.is_success() {
            return Err(StoreError::PidGenerator(format!("{url} returned {status}: {body}")));
        }
        let pid = body.trim();
        if pid.is_empty() {
            return Err(StoreError::PidGenerator(format!("{url} returned an empty pid")));
        }
        Ok(pid.to_string())
    }
}

#[async_trait]
impl ObjectStore for FedoraClient {
    async fn new_empty_object(&self, req: NewObject) -> Result<String, StoreError> {
        let pid = self.generate_pid().await?;
        let label = req.old_ids.first().cloned().unwrap_or_else(|| pid.clone());
        let foxml = build_foxml(&pid, &label, &req.old_ids, &req.collections);
        let request = self
            .request(Method::POST, &format!("objects/{pid}"))
            .query(&[("logMessage", req.log_message.as_str())])
            .header(reqwest::header::CONTENT_TYPE, "text/xml")
            .body(foxml);
        self.execute(request, "ingest object").await?;
        Ok(pid)
    }

    async fn modify_datastream_by_value(&self, req: DatastreamWrite) -> Result<(), StoreError> {
        let alt_ids = req.alternative_ids.join(" ");
        let mut query: Vec<(&str, &str)> = vec![
            ("controlGroup", "X"),
            ("mimeType", "text/xml"),
            ("versionable", "true"),
            ("dsLabel", req.datastream.as_str()),
            ("altIDs", alt_ids.as_str()),
            ("logMessage", req.comment.as_str()),
        ];
        if let Some(checksum) = &req.checksum {
            query.push(("checksumType", "MD5"));
            query.push(("checksum", checksum.as_str()));
        }
        let path = format!("objects/{}/datastreams/{}", req.pid, req.datastream);

        let modify = self
            .request(Method::PUT, &path)
            .query(&query)
            .header(reqwest::header::CONTENT_TYPE, "text/xml")
            .body(req.content.clone());
        let (mut status, mut body) = self.send(modify, "modify datastream").await?;
        if status == StatusCode::NOT_FOUND {
            debug!(pid = %req.pid, datastream = %req.datastream, "Datastream absent, adding it");
            let add = self
                .request(Method::POST, &path)
                .query(&query)
                .header(reqwest::header::CONTENT_TYPE, "text/xml")
                .body(req.content.clone());
            (status, body) = self.send(add, "add datastream").await?;
        }

        if status.is_success() {
            return Ok(());
        }
        error!(status = %status, pid = %req.pid, datastream = %req.datastream, "Datastream write rejected. Response body: {body}");
        if is_checksum_mismatch(&body) {
            return Err(StoreError::ChecksumMismatch {
                pid: req.pid.clone(),
                datastream: req.datastream.clone(),
            });
        }
        Err(map_status(status, &body, "write datastream"))
    }

    async fn add_relation(&self, req: RelationWrite) -> Result<(), StoreError> {
        let subject = fedora_uri(&req.subject);
        let object = fedora_uri(&req.object);
        let request = self
            .request(Method::POST, &format!("objects/{}/relationships/new", req.subject))
            .query(&[
                ("subject", subject.as_str()),
                ("predicate", req.predicate.as_str()),
                ("object", object.as_str()),
                ("isLiteral", "false"),
            ]);
        self.execute(request, "add relation").await?;
        debug!(comment = %req.comment, "Relation added");
        Ok(())
    }

    async fn find_objects_by_identifier(&self, identifier: String) -> Result<Vec<String>, StoreError> {
        let query = format!("identifier='{}'", identifier.replace('\'', "\\'"));
        let request = self.request(Method::GET, "objects").query(&[
            ("query", query.as_str()),
            ("pid", "true"),
            ("resultFormat", "xml"),
            ("maxResults", "1000"),
        ]);
        let body = self.execute(request, "find objects").await?;
        parse_search_pids(&body)
    }

    async fn get_named_relations(&self, pid: String, predicate: String) -> Result<Vec<String>, StoreError> {
        let subject = fedora_uri(&pid);
        let request = self
            .request(Method::GET, &format!("objects/{pid}/relationships"))
            .query(&[
                ("subject", subject.as_str()),
                ("predicate", predicate.as_str()),
                ("format", "n-triples"),
            ]);
        let body = self.execute(request, "get relations").await?;
        parse_triple_objects(&body)
    }

    async fn purge_object(&self, pid: String, comment: String) -> Result<(), StoreError> {
        let request = self
            .request(Method::DELETE, &format!("objects/{pid}"))
            .query(&[("logMessage", comment.as_str())]);
        self.execute(request, "purge object").await?;
        Ok(())
    }
}

fn map_status(status: StatusCode, body: &str, context: &str) -> StoreError {
    let message = format!("{context} returned {status}: {body}");
    match status {
        StatusCode::UNAUTHORIZED => StoreError::InvalidCredentials(message),
        StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => StoreError::InvalidResource(message),
        _ => StoreError::MethodFailed(message),
    }
}

fn is_checksum_mismatch(body: &str) -> bool {
    body.to_lowercase().contains("checksum mismatch")
}

fn fedora_uri(pid: &str) -> String {
    if pid.starts_with(FEDORA_URI_PREFIX) {
        pid.to_string()
    } else {
        format!("{FEDORA_URI_PREFIX}{pid}")
    }
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// FOXML for an empty object: DC identifiers plus collection membership.
fn build_foxml(pid: &str, label: &str, old_ids: &[String], collections: &[String]) -> String {
    let pid = xml_escape(pid);
    let mut identifiers = format!("<dc:identifier>{pid}</dc:identifier>");
    for id in old_ids {
        identifiers.push_str(&format!("<dc:identifier>{}</dc:identifier>", xml_escape(id)));
    }

    let mut foxml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<foxml:digitalObject VERSION="1.1" PID="{pid}" xmlns:foxml="info:fedora/fedora-system:def/foxml#">
<foxml:objectProperties>
<foxml:property NAME="info:fedora/fedora-system:def/model#state" VALUE="Active"/>
<foxml:property NAME="info:fedora/fedora-system:def/model#label" VALUE="{label}"/>
</foxml:objectProperties>
<foxml:datastream ID="DC" STATE="A" CONTROL_GROUP="X" VERSIONABLE="true">
<foxml:datastreamVersion ID="DC1.0" LABEL="Dublin Core Record" MIMETYPE="text/xml" FORMAT_URI="http://www.openarchives.org/OAI/2.0/oai_dc/">
<foxml:xmlContent>
<oai_dc:dc xmlns:oai_dc="http://www.openarchives.org/OAI/2.0/oai_dc/" xmlns:dc="http://purl.org/dc/elements/1.1/">{identifiers}</oai_dc:dc>
</foxml:xmlContent>
</foxml:datastreamVersion>
</foxml:datastream>
"#,
        label = xml_escape(label),
    );

    if !collections.is_empty() {
        let (namespace, relation) = IS_PART_OF_COLLECTION_RELATION
            .rsplit_once('#')
            .map(|(ns, rel)| (format!("{ns}#"), rel))
            .unwrap_or_default();
        let mut description = String::new();
        for collection in collections {
            description.push_str(&format!(
                r#"<doms:{relation} rdf:resource="{}"/>"#,
                xml_escape(&fedora_uri(collection))
            ));
        }
        foxml.push_str(&format!(
            r#"<foxml:datastream ID="RELS-EXT" STATE="A" CONTROL_GROUP="X" VERSIONABLE="true">
<foxml:datastreamVersion ID="RELS-EXT1.0" LABEL="Relationships" MIMETYPE="application/rdf+xml" FORMAT_URI="info:fedora/fedora-system:FedoraRELSExt-1.0">
<foxml:xmlContent>
<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#" xmlns:doms="{namespace}">
<rdf:Description rdf:about="info:fedora/{pid}">{description}</rdf:Description>
</rdf:RDF>
</foxml:xmlContent>
</foxml:datastreamVersion>
</foxml:datastream>
"#
        ));
    }

    foxml.push_str("</foxml:digitalObject>\n");
    foxml
}

fn parse_search_pids(body: &str) -> Result<Vec<String>, StoreError> {
    let pid_tag = Regex::new(r"<pid>\s*([^<\s]+)\s*</pid>")
        .map_err(|e| StoreError::MethodFailed(format!("invalid search pattern: {e}")))?;
    Ok(pid_tag
        .captures_iter(body)
        .map(|caps| caps[1].to_string())
        .collect())
}

/// Object pids of every `<s> <p> <info:fedora/o> .` line.
fn parse_triple_objects(body: &str) -> Result<Vec<String>, StoreError> {
    let triple = Regex::new(r"(?m)^\s*<[^>]*>\s+<[^>]*>\s+<info:fedora/([^>]+)>")
        .map_err(|e| StoreError::MethodFailed(format!("invalid triple pattern: {e}")))?;
    Ok(triple
        .captures_iter(body)
        .map(|caps| caps[1].to_string())
        .collect())
}
