//! Record model & codec (spec §4.3, §3 AccountRecord/Group).
//!
//! The wire format is a small deterministic TLV scheme, the same shape as
//! the teacher's `vault/format_v1.rs` header encoding (`push_tlv` / a
//! type+length+value loop), applied here to plaintext records instead of
//! the header. Unknown TLV types encountered while parsing are kept
//! verbatim in `unknown_fields` and re-emitted after the known fields so a
//! newer payload round-trips through an older build without data loss.

use std::collections::BTreeMap;

use thiserror::Error;
use uuid::Uuid;

const TAG_ID: u16 = 0x01;
const TAG_NAME: u16 = 0x02;
const TAG_USERNAME: u16 = 0x03;
const TAG_EMAIL: u16 = 0x04;
const TAG_URL: u16 = 0x05;
const TAG_PASSWORD: u16 = 0x06;
const TAG_NOTES: u16 = 0x07;
const TAG_TAGS: u16 = 0x08;
const TAG_FAVORITE: u16 = 0x09;
const TAG_CREATED_AT: u16 = 0x0A;
const TAG_MODIFIED_AT: u16 = 0x0B;
const TAG_GROUP_ID: u16 = 0x0C;
const TAG_ADMIN_VISIBLE_ONLY: u16 = 0x0D;
const TAG_ADMIN_ONLY_DELETE: u16 = 0x0E;

const GROUP_TAG_ID: u16 = 0x01;
const GROUP_TAG_NAME: u16 = 0x02;
const GROUP_TAG_PARENT: u16 = 0x03;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordCodecError {
    #[error("truncated tlv stream")]
    Truncated,
    #[error("invalid field encoding: {0}")]
    InvalidField(&'static str),
    #[error("unsupported payload schema version {0}")]
    UnsupportedSchema(u32),
    #[error("duplicate record id")]
    DuplicateRecordId,
    #[error("acyclic group tree violated")]
    CyclicGroup,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRecord {
    pub id: Uuid,
    pub name: String,
    pub username: String,
    pub email: String,
    pub url: String,
    pub password: String,
    pub notes: String,
    pub tags: Vec<String>,
    pub favorite: bool,
    pub created_at: i64,
    pub modified_at: i64,
    pub group_id: Option<Uuid>,
    pub admin_visible_only: bool,
    pub admin_only_delete: bool,
    /// Unrecognised TLVs from a newer payload, preserved verbatim.
    pub unknown_fields: Vec<(u16, Vec<u8>)>,
}

impl AccountRecord {
    pub fn new(name: impl Into<String>, now: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            username: String::new(),
            email: String::new(),
            url: String::new(),
            password: String::new(),
            notes: String::new(),
            tags: Vec::new(),
            favorite: false,
            created_at: now,
            modified_at: now,
            group_id: None,
            admin_visible_only: false,
            admin_only_delete: false,
            unknown_fields: Vec::new(),
        }
    }

    /// Trim, lower-case-preserve, dedupe, and reject overlong/invalid tags
    /// (spec §3: each tag <= 50 bytes, no comma, unique within record).
    pub fn set_tags(&mut self, tags: Vec<String>) {
        let mut seen = std::collections::BTreeSet::new();
        let mut out = Vec::new();
        for tag in tags {
            let trimmed = tag.trim();
            if trimmed.is_empty() || trimmed.len() > 50 || trimmed.contains(',') {
                continue;
            }
            if seen.insert(trimmed.to_string()) {
                out.push(trimmed.to_string());
            }
        }
        self.tags = out;
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        push_tlv_bytes(buf, TAG_ID, self.id.as_bytes());
        push_tlv_str(buf, TAG_NAME, &self.name);
        push_tlv_str(buf, TAG_USERNAME, &self.username);
        push_tlv_str(buf, TAG_EMAIL, &self.email);
        push_tlv_str(buf, TAG_URL, &self.url);
        push_tlv_str(buf, TAG_PASSWORD, &self.password);
        push_tlv_str(buf, TAG_NOTES, &self.notes);

        let mut tags_buf = Vec::new();
        for tag in &self.tags {
            let bytes = tag.as_bytes();
            tags_buf.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
            tags_buf.extend_from_slice(bytes);
        }
        push_tlv_bytes(buf, TAG_TAGS, &tags_buf);

        push_tlv_bytes(buf, TAG_FAVORITE, &[self.favorite as u8]);
        push_tlv_bytes(buf, TAG_CREATED_AT, &self.created_at.to_le_bytes());
        push_tlv_bytes(buf, TAG_MODIFIED_AT, &self.modified_at.to_le_bytes());
        if let Some(group_id) = self.group_id {
            push_tlv_bytes(buf, TAG_GROUP_ID, group_id.as_bytes());
        }
        push_tlv_bytes(buf, TAG_ADMIN_VISIBLE_ONLY, &[self.admin_visible_only as u8]);
        push_tlv_bytes(buf, TAG_ADMIN_ONLY_DELETE, &[self.admin_only_delete as u8]);

        let mut unknown_sorted = self.unknown_fields.clone();
        unknown_sorted.sort_by_key(|(tag, _)| *tag);
        for (tag, value) in unknown_sorted {
            push_tlv_bytes(buf, tag, &value);
        }
    }

    fn decode(bytes: &[u8]) -> Result<Self, RecordCodecError> {
        let tlvs = parse_tlvs(bytes)?;
        let mut id = None;
        let mut name = String::new();
        let mut username = String::new();
        let mut email = String::new();
        let mut url = String::new();
        let mut password = String::new();
        let mut notes = String::new();
        let mut tags = Vec::new();
        let mut favorite = false;
        let mut created_at = 0i64;
        let mut modified_at = 0i64;
        let mut group_id = None;
        let mut admin_visible_only = false;
        let mut admin_only_delete = false;
        let mut unknown_fields = Vec::new();

        for (tag, value) in tlvs {
            match tag {
                TAG_ID => id = Some(uuid_from(value, "id")?),
                TAG_NAME => name = str_from(value, "name")?,
                TAG_USERNAME => username = str_from(value, "username")?,
                TAG_EMAIL => email = str_from(value, "email")?,
                TAG_URL => url = str_from(value, "url")?,
                TAG_PASSWORD => password = str_from(value, "password")?,
                TAG_NOTES => notes = str_from(value, "notes")?,
                TAG_TAGS => tags = decode_tags(value)?,
                TAG_FAVORITE => favorite = bool_from(value, "favorite")?,
                TAG_CREATED_AT => created_at = i64_from(value, "created_at")?,
                TAG_MODIFIED_AT => modified_at = i64_from(value, "modified_at")?,
                TAG_GROUP_ID => group_id = Some(uuid_from(value, "group_id")?),
                TAG_ADMIN_VISIBLE_ONLY => admin_visible_only = bool_from(value, "admin_visible_only")?,
                TAG_ADMIN_ONLY_DELETE => admin_only_delete = bool_from(value, "admin_only_delete")?,
                other => unknown_fields.push((other, value.to_vec())),
            }
        }

        Ok(Self {
            id: id.ok_or(RecordCodecError::InvalidField("id"))?,
            name,
            username,
            email,
            url,
            password,
            notes,
            tags,
            favorite,
            created_at,
            modified_at,
            group_id,
            admin_visible_only,
            admin_only_delete,
            unknown_fields,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub id: Uuid,
    pub name: String,
    pub parent_id: Option<Uuid>,
}

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Self { id: Uuid::new_v4(), name: name.into(), parent_id: None }
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        push_tlv_bytes(buf, GROUP_TAG_ID, self.id.as_bytes());
        push_tlv_str(buf, GROUP_TAG_NAME, &self.name);
        if let Some(parent) = self.parent_id {
            push_tlv_bytes(buf, GROUP_TAG_PARENT, parent.as_bytes());
        }
    }

    fn decode(bytes: &[u8]) -> Result<Self, RecordCodecError> {
        let tlvs = parse_tlvs(bytes)?;
        let mut id = None;
        let mut name = String::new();
        let mut parent_id = None;
        for (tag, value) in tlvs {
            match tag {
                GROUP_TAG_ID => id = Some(uuid_from(value, "id")?),
                GROUP_TAG_NAME => name = str_from(value, "name")?,
                GROUP_TAG_PARENT => parent_id = Some(uuid_from(value, "parent")?),
                _ => {}
            }
        }
        Ok(Self { id: id.ok_or(RecordCodecError::InvalidField("id"))?, name, parent_id })
    }
}

/// The plaintext payload that sits behind whole-blob AEAD encryption.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VaultPayload {
    pub records: Vec<AccountRecord>,
    pub groups: Vec<Group>,
}

const PAYLOAD_SCHEMA_VERSION: u32 = 1;

impl VaultPayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&PAYLOAD_SCHEMA_VERSION.to_le_bytes());
        out.extend_from_slice(&(self.records.len() as u32).to_le_bytes());
        for record in &self.records {
            let mut rec_buf = Vec::new();
            record.encode(&mut rec_buf);
            out.extend_from_slice(&(rec_buf.len() as u32).to_le_bytes());
            out.extend_from_slice(&rec_buf);
        }
        out.extend_from_slice(&(self.groups.len() as u32).to_le_bytes());
        for group in &self.groups {
            let mut grp_buf = Vec::new();
            group.encode(&mut grp_buf);
            out.extend_from_slice(&(grp_buf.len() as u32).to_le_bytes());
            out.extend_from_slice(&grp_buf);
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, RecordCodecError> {
        let mut pos = 0usize;
        let schema = read_u32(bytes, &mut pos)?;
        if schema != PAYLOAD_SCHEMA_VERSION {
            return Err(RecordCodecError::UnsupportedSchema(schema));
        }

        let record_count = read_u32(bytes, &mut pos)? as usize;
        let mut records = Vec::with_capacity(record_count);
        let mut seen_ids = std::collections::BTreeSet::new();
        for _ in 0..record_count {
            let len = read_u32(bytes, &mut pos)? as usize;
            let slice = read_slice(bytes, &mut pos, len)?;
            let record = AccountRecord::decode(slice)?;
            if !seen_ids.insert(record.id) {
                return Err(RecordCodecError::DuplicateRecordId);
            }
            records.push(record);
        }

        let group_count = read_u32(bytes, &mut pos)? as usize;
        let mut groups = Vec::with_capacity(group_count);
        for _ in 0..group_count {
            let len = read_u32(bytes, &mut pos)? as usize;
            let slice = read_slice(bytes, &mut pos, len)?;
            groups.push(Group::decode(slice)?);
        }

        validate_group_tree(&groups)?;
        Ok(Self { records, groups })
    }
}

fn validate_group_tree(groups: &[Group]) -> Result<(), RecordCodecError> {
    let by_id: BTreeMap<Uuid, Option<Uuid>> = groups.iter().map(|g| (g.id, g.parent_id)).collect();
    for group in groups {
        let mut seen = std::collections::BTreeSet::new();
        let mut current = group.id;
        loop {
            if !seen.insert(current) {
                return Err(RecordCodecError::CyclicGroup);
            }
            match by_id.get(&current).copied().flatten() {
                Some(parent) => current = parent,
                None => break,
            }
        }
    }
    Ok(())
}

fn push_tlv_bytes(buf: &mut Vec<u8>, tag: u16, value: &[u8]) {
    buf.extend_from_slice(&tag.to_le_bytes());
    buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
    buf.extend_from_slice(value);
}

fn push_tlv_str(buf: &mut Vec<u8>, tag: u16, value: &str) {
    push_tlv_bytes(buf, tag, value.as_bytes());
}

fn parse_tlvs(bytes: &[u8]) -> Result<Vec<(u16, &[u8])>, RecordCodecError> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    while pos < bytes.len() {
        if bytes.len() - pos < 6 {
            return Err(RecordCodecError::Truncated);
        }
        let tag = u16::from_le_bytes(bytes[pos..pos + 2].try_into().unwrap());
        let len = u32::from_le_bytes(bytes[pos + 2..pos + 6].try_into().unwrap()) as usize;
        pos += 6;
        if bytes.len() - pos < len {
            return Err(RecordCodecError::Truncated);
        }
        out.push((tag, &bytes[pos..pos + len]));
        pos += len;
    }
    Ok(out)
}

fn decode_tags(bytes: &[u8]) -> Result<Vec<String>, RecordCodecError> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    while pos < bytes.len() {
        if bytes.len() - pos < 2 {
            return Err(RecordCodecError::Truncated);
        }
        let len = u16::from_le_bytes(bytes[pos..pos + 2].try_into().unwrap()) as usize;
        pos += 2;
        if bytes.len() - pos < len {
            return Err(RecordCodecError::Truncated);
        }
        let s = std::str::from_utf8(&bytes[pos..pos + len])
            .map_err(|_| RecordCodecError::InvalidField("tags"))?;
        out.push(s.to_string());
        pos += len;
    }
    Ok(out)
}

fn uuid_from(bytes: &[u8], field: &'static str) -> Result<Uuid, RecordCodecError> {
    let arr: [u8; 16] = bytes.try_into().map_err(|_| RecordCodecError::InvalidField(field))?;
    Ok(Uuid::from_bytes(arr))
}

fn str_from(bytes: &[u8], field: &'static str) -> Result<String, RecordCodecError> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|_| RecordCodecError::InvalidField(field))
}

fn bool_from(bytes: &[u8], field: &'static str) -> Result<bool, RecordCodecError> {
    match bytes {
        [0] => Ok(false),
        [1] => Ok(true),
        _ => Err(RecordCodecError::InvalidField(field)),
    }
}

fn i64_from(bytes: &[u8], field: &'static str) -> Result<i64, RecordCodecError> {
    let arr: [u8; 8] = bytes.try_into().map_err(|_| RecordCodecError::InvalidField(field))?;
    Ok(i64::from_le_bytes(arr))
}

fn read_u32(bytes: &[u8], pos: &mut usize) -> Result<u32, RecordCodecError> {
    if bytes.len() - *pos < 4 {
        return Err(RecordCodecError::Truncated);
    }
    let value = u32::from_le_bytes(bytes[*pos..*pos + 4].try_into().unwrap());
    *pos += 4;
    Ok(value)
}

fn read_slice<'a>(bytes: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8], RecordCodecError> {
    if bytes.len() - *pos < len {
        return Err(RecordCodecError::Truncated);
    }
    let slice = &bytes[*pos..*pos + len];
    *pos += len;
    Ok(slice)
}
