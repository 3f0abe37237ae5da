//! JSON representations of catalog entities.
//!
//! Dates serialize as ISO-8601 UTC; checksums as `<algo>:<hex>`; every
//! entity carries a `links` object pointing back into the REST surface.

use crate::models::{Bucket, FileSummary, MultipartObject, ObjectVersion, Part};
use crate::types::Checksum;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

fn bucket_url(bucket: &uuid::Uuid) -> String {
    format!("/files/{bucket}")
}

fn object_url(bucket: &uuid::Uuid, key: &str) -> String {
    format!("/files/{}/{}", bucket, urlencoding::encode(key))
}

#[derive(Debug, Serialize)]
pub struct BucketLinks {
    #[serde(rename = "self")]
    pub self_: String,
    pub uploads: String,
    pub versions: String,
}

#[derive(Debug, Serialize)]
pub struct BucketRep {
    pub id: uuid::Uuid,
    pub size: u64,
    pub quota_size: Option<u64>,
    pub max_file_size: Option<u64>,
    pub locked: bool,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub links: BucketLinks,
}

impl BucketRep {
    pub fn new(bucket: &Bucket) -> Self {
        let base = bucket_url(&bucket.id);
        Self {
            id: bucket.id,
            size: bucket.size,
            quota_size: bucket.quota_size,
            max_file_size: bucket.max_file_size,
            locked: bucket.locked,
            created: bucket.created,
            updated: bucket.updated,
            links: BucketLinks {
                self_: base.clone(),
                uploads: format!("{base}?uploads"),
                versions: format!("{base}?versions"),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ObjectVersionLinks {
    #[serde(rename = "self")]
    pub self_: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploads: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ObjectVersionRep {
    pub key: String,
    pub version_id: uuid::Uuid,
    pub is_head: bool,
    pub mimetype: Option<String>,
    pub size: Option<u64>,
    pub checksum: Option<Checksum>,
    pub delete_marker: bool,
    pub tags: BTreeMap<String, String>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub links: ObjectVersionLinks,
}

impl ObjectVersionRep {
    pub fn new(
        version: &ObjectVersion,
        file: Option<&FileSummary>,
        tags: Vec<(String, String)>,
    ) -> Self {
        let base = object_url(&version.bucket_id, &version.key);
        Self {
            key: version.key.clone(),
            version_id: version.version_id,
            is_head: version.is_head,
            mimetype: version.mimetype.clone(),
            size: file.map(|f| f.size),
            checksum: file.and_then(|f| f.checksum.clone()),
            delete_marker: version.is_delete_marker(),
            tags: tags.into_iter().collect(),
            created: version.created,
            updated: version.updated,
            links: ObjectVersionLinks {
                self_: base.clone(),
                version: format!("{base}?versionId={}", version.version_id),
                uploads: version.is_head.then(|| format!("{base}?uploads")),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MultipartLinks {
    #[serde(rename = "self")]
    pub self_: String,
    pub object: String,
    pub bucket: String,
}

#[derive(Debug, Serialize)]
pub struct MultipartRep {
    pub id: uuid::Uuid,
    pub bucket: uuid::Uuid,
    pub key: String,
    pub size: u64,
    pub part_size: u64,
    pub last_part_number: u64,
    pub last_part_size: u64,
    pub completed: bool,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub links: MultipartLinks,
}

impl MultipartRep {
    pub fn new(multipart: &MultipartObject) -> Self {
        let object = object_url(&multipart.bucket_id, &multipart.key);
        Self {
            id: multipart.upload_id,
            bucket: multipart.bucket_id,
            key: multipart.key.clone(),
            size: multipart.size,
            part_size: multipart.chunk_size,
            last_part_number: multipart.last_part_number,
            last_part_size: multipart.last_part_size,
            completed: multipart.completed,
            created: multipart.created,
            updated: multipart.updated,
            links: MultipartLinks {
                self_: format!("{object}?uploadId={}", multipart.upload_id),
                object,
                bucket: bucket_url(&multipart.bucket_id),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PartRep {
    pub part_number: u64,
    pub start_byte: u64,
    pub end_byte: u64,
    pub checksum: Option<Checksum>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl PartRep {
    pub fn new(part: &Part) -> Self {
        Self {
            part_number: part.part_number,
            start_byte: part.start_byte,
            end_byte: part.end_byte,
            checksum: part.checksum.clone(),
            created: part.created,
            updated: part.updated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_object_links_encode_key() {
        let version = ObjectVersion {
            bucket_id: Uuid::nil(),
            key: "dir/a b.txt".to_string(),
            version_id: Uuid::nil(),
            file_id: None,
            mimetype: None,
            is_head: true,
            created: Utc::now(),
            updated: Utc::now(),
        };
        let rep = ObjectVersionRep::new(&version, None, Vec::new());
        assert!(rep.links.self_.contains("dir%2Fa%20b.txt"));
        assert!(rep.delete_marker);
        assert!(rep.links.uploads.is_some());
    }

    #[test]
    fn test_non_head_has_no_uploads_link() {
        let version = ObjectVersion {
            bucket_id: Uuid::nil(),
            key: "k".to_string(),
            version_id: Uuid::nil(),
            file_id: None,
            mimetype: None,
            is_head: false,
            created: Utc::now(),
            updated: Utc::now(),
        };
        let rep = ObjectVersionRep::new(&version, None, Vec::new());
        assert!(rep.links.uploads.is_none());
    }

    #[test]
    fn test_dates_serialize_iso8601() {
        let version = ObjectVersion {
            bucket_id: Uuid::nil(),
            key: "k".to_string(),
            version_id: Uuid::nil(),
            file_id: None,
            mimetype: None,
            is_head: true,
            created: Utc::now(),
            updated: Utc::now(),
        };
        let json = serde_json::to_value(ObjectVersionRep::new(&version, None, Vec::new())).unwrap();
        let created = json["created"].as_str().unwrap();
        assert!(created.contains('T'));
        assert!(created.ends_with('Z') || created.contains("+00:00"));
    }
}
