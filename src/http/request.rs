use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::multipart::{Form, Part};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;

use crate::error::ClientError;

/// Binary upload carried by a multipart field.
#[derive(Clone)]
pub struct FileUpload {
    pub file_name: String,
    pub mime: Option<String>,
    pub bytes: Vec<u8>,
}

impl FileUpload {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            mime: None,
            bytes,
        }
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }
}

impl fmt::Debug for FileUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileUpload")
            .field("file_name", &self.file_name)
            .field("mime", &self.mime)
            .field("len", &self.bytes.len())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum FormPart {
    Text { name: String, value: String },
    File { name: String, upload: FileUpload },
}

/// Replayable request body. Rebuilt into a concrete body on every attempt.
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(Value),
    Multipart(Vec<FormPart>),
}

/// Field map plus optional file uploads, sent as JSON when there are no
/// files and as multipart otherwise.
#[derive(Debug, Clone, Default)]
pub struct FormData {
    fields: Map<String, Value>,
    files: Vec<(String, FileUpload)>,
}

impl FormData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fields(fields: Value) -> Self {
        let fields = match fields {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            fields,
            files: Vec::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn file(mut self, name: impl Into<String>, upload: FileUpload) -> Self {
        self.files.push((name.into(), upload));
        self
    }

    pub fn has_files(&self) -> bool {
        !self.files.is_empty()
    }

    /// Multipart parts: null fields are skipped, scalars are sent as text.
    pub fn to_parts(&self) -> Vec<FormPart> {
        let mut parts: Vec<FormPart> = self
            .fields
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(name, value)| FormPart::Text {
                name: name.clone(),
                value: match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                },
            })
            .collect();

        parts.extend(self.files.iter().map(|(name, upload)| FormPart::File {
            name: name.clone(),
            upload: upload.clone(),
        }));
        parts
    }

    pub fn into_body(self) -> RequestBody {
        if self.has_files() {
            RequestBody::Multipart(self.to_parts())
        } else {
            RequestBody::Json(Value::Object(self.fields))
        }
    }

    pub fn into_multipart(self) -> RequestBody {
        RequestBody::Multipart(self.to_parts())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AuthMode {
    /// Current session token, with the refresh-and-retry protocol.
    Session,
    /// Current session token, failures surfaced as-is.
    SessionNoRefresh,
    /// A token supplied by the caller.
    Explicit,
    /// No `Authorization` header at all.
    Anonymous,
}

/// Description of one API call, independent of any attempt.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: RequestBody,
    auth: AuthMode,
    explicit_token: Option<String>,
    retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: RequestBody::Empty,
            auth: AuthMode::Session,
            explicit_token: None,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn queries<I, K, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.query
            .extend(pairs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Send without credentials and without the refresh protocol.
    pub fn anonymous(mut self) -> Self {
        self.auth = AuthMode::Anonymous;
        self
    }

    /// Attach the session token but surface a 401 instead of refreshing.
    pub fn without_refresh(mut self) -> Self {
        self.auth = AuthMode::SessionNoRefresh;
        self
    }

    /// Authenticate with `token` instead of the session's token. No refresh.
    pub fn bearer(mut self, token: impl Into<String>) -> Self {
        self.auth = AuthMode::Explicit;
        self.explicit_token = Some(token.into());
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn is_retried(&self) -> bool {
        self.retried
    }

    pub(crate) fn mark_retried(&mut self) {
        self.retried = true;
    }

    pub(crate) fn auth_mode(&self) -> AuthMode {
        self.auth
    }

    pub(crate) fn explicit_token(&self) -> Option<&str> {
        self.explicit_token.as_deref()
    }

    /// Build one concrete attempt.
    pub(crate) fn build(
        &self,
        client: &reqwest::Client,
        url: reqwest::Url,
        token: Option<&str>,
    ) -> Result<reqwest::RequestBuilder, ClientError> {
        let mut builder = client.request(self.method.clone(), url);

        if !self.query.is_empty() {
            builder = builder.query(&self.query);
        }

        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }

        builder = match &self.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Multipart(parts) => builder.multipart(build_form(parts)?),
        };

        Ok(builder)
    }
}

fn build_form(parts: &[FormPart]) -> Result<Form, ClientError> {
    let mut form = Form::new();
    for part in parts {
        form = match part {
            FormPart::Text { name, value } => form.text(name.clone(), value.clone()),
            FormPart::File { name, upload } => {
                let mut file =
                    Part::bytes(upload.bytes.clone()).file_name(upload.file_name.clone());
                if let Some(mime) = &upload.mime {
                    file = file.mime_str(mime)?;
                }
                form.part(name.clone(), file)
            }
        };
    }
    Ok(form)
}

/// Status, headers and decoded body of a received response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl ApiResponse {
    pub(crate) async fn read(response: reqwest::Response) -> Result<Self, ClientError> {
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.bytes().await?;

        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };

        Ok(Self {
            status,
            headers,
            body,
        })
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.headers
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }

    /// Turn a non-success response into the matching [`ClientError`].
    pub fn error_for_status(self) -> Result<Self, ClientError> {
        if self.is_success() {
            Ok(self)
        } else {
            let retry_after = self.retry_after();
            Err(ClientError::from_response(self.status, retry_after, self.body))
        }
    }

    pub fn into_json<T: DeserializeOwned>(self) -> Result<T, ClientError> {
        Ok(serde_json::from_value(self.body)?)
    }
}
