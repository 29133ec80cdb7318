//! Request parameters and their urlencoded / multipart encodings

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{MixiError, Result};

/// Value of one request field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormValue {
    /// Plain text. A value of the form `@<path>` naming an existing file is
    /// sent as that file when encoding multipart.
    Text(String),
    /// File read from disk at encoding time
    File {
        path: PathBuf,
        filename: Option<String>,
        content_type: Option<String>,
        encoding: Option<String>,
    },
    /// In-memory attachment
    Content {
        data: Vec<u8>,
        filename: Option<String>,
        content_type: Option<String>,
        encoding: Option<String>,
    },
}

impl FormValue {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        FormValue::File {
            path: path.into(),
            filename: None,
            content_type: None,
            encoding: None,
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, FormValue::Text(_))
    }
}

impl From<&str> for FormValue {
    fn from(s: &str) -> Self {
        FormValue::Text(s.to_string())
    }
}

impl From<String> for FormValue {
    fn from(s: String) -> Self {
        FormValue::Text(s)
    }
}

/// Ordered request fields. Setting an existing key replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Form {
    fields: Vec<(String, FormValue)>,
}

impl Form {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, FormValue::Text(value.into()));
        self
    }

    pub fn file(mut self, key: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.set(key, FormValue::file(path));
        self
    }

    pub fn attach(mut self, key: impl Into<String>, value: FormValue) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: FormValue) {
        let key = key.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&FormValue> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FormValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// `application/x-www-form-urlencoded` serialization. Attachments are rejected.
    pub fn urlencoded(&self) -> Result<String> {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in &self.fields {
            match value {
                FormValue::Text(text) => {
                    serializer.append_pair(key, text);
                }
                _ => return Err(MixiError::AttachmentNotAllowed(key.clone())),
            }
        }
        Ok(serializer.finish())
    }

    /// `multipart/form-data` body delimited by `boundary`.
    pub fn encode_multipart(&self, boundary: &str) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        for (key, value) in &self.fields {
            let part = Part::resolve(value)?;
            check_header_value(key)?;
            for header in [&part.filename, &part.content_type, &part.encoding]
                .into_iter()
                .flatten()
            {
                check_header_value(header)?;
            }

            let mut head = format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"",
                boundary, key
            );
            if let Some(ref name) = part.filename {
                head.push_str(&format!("; filename={}", name));
            }
            head.push_str("\r\n");
            if let Some(ref ct) = part.content_type {
                head.push_str(&format!("Content-Type: {}\r\n", ct));
            }
            if let Some(ref enc) = part.encoding {
                head.push_str(&format!("Content-Transfer-Encoding: {}\r\n", enc));
            }
            head.push_str("\r\n");

            body.extend_from_slice(head.as_bytes());
            body.extend_from_slice(&part.data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());
        Ok(body)
    }
}

/// A field resolved to bytes plus its per-part headers.
struct Part {
    data: Vec<u8>,
    filename: Option<String>,
    content_type: Option<String>,
    encoding: Option<String>,
}

impl Part {
    fn resolve(value: &FormValue) -> Result<Self> {
        match value {
            FormValue::Text(text) => match attachment_path(text) {
                Some(path) => Self::from_file(path, None, None, None),
                None => Ok(Self {
                    data: text.as_bytes().to_vec(),
                    filename: None,
                    content_type: None,
                    encoding: None,
                }),
            },
            FormValue::File {
                path,
                filename,
                content_type,
                encoding,
            } => Self::from_file(
                path,
                filename.clone(),
                content_type.clone(),
                encoding.clone(),
            ),
            FormValue::Content {
                data,
                filename,
                content_type,
                encoding,
            } => {
                let encoding = encoding
                    .clone()
                    .or_else(|| content_type.as_deref().and_then(default_encoding).map(String::from));
                Ok(Self {
                    data: data.clone(),
                    filename: filename.clone(),
                    content_type: content_type.clone(),
                    encoding,
                })
            }
        }
    }

    fn from_file(
        path: &Path,
        filename: Option<String>,
        content_type: Option<String>,
        encoding: Option<String>,
    ) -> Result<Self> {
        let data = fs::read(path)?;
        let content_type =
            content_type.or_else(|| content_type_for(path).map(String::from));
        let encoding = encoding
            .or_else(|| content_type.as_deref().and_then(default_encoding).map(String::from));
        let filename = filename.or_else(|| {
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
        });
        Ok(Self {
            data,
            filename,
            content_type,
            encoding,
        })
    }
}

/// Quotes and line breaks would end the part header early.
fn check_header_value(value: &str) -> Result<()> {
    if value.contains(|c: char| matches!(c, '"' | '\r' | '\n')) {
        return Err(MixiError::InvalidPartHeader(value.to_string()));
    }
    Ok(())
}

/// `@<path>` naming an existing file.
fn attachment_path(text: &str) -> Option<&Path> {
    let path = Path::new(text.strip_prefix('@')?);
    path.is_file().then_some(path)
}

/// Fresh multipart boundary.
pub fn new_boundary() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("---------------------{}", &id[..10])
}

/// Transfer encoding implied by a content type: textual types get none.
fn default_encoding(content_type: &str) -> Option<&'static str> {
    let textual = content_type.starts_with("text")
        || content_type.ends_with("xml")
        || content_type.ends_with("json")
        || content_type.ends_with("script");
    (!textual).then_some("binary")
}

/// Content type for common upload extensions.
pub fn content_type_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let ct = match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "txt" | "asc" => "text/plain",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "text/javascript",
        "xml" | "xsl" => "text/xml",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "mp3" | "mpga" => "audio/mpeg",
        "wav" => "audio/x-wav",
        "mpeg" | "mpg" => "video/mpeg",
        "mov" | "qt" => "video/quicktime",
        "avi" => "video/x-msvideo",
        _ => return None,
    };
    Some(ct)
}
