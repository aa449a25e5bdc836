//! Decoded request form: ordered text parameters plus uploaded file parts.
//!
//! Query-string, urlencoded-body and multipart requests all normalize into
//! [`ParsedForm`]. Body parameters take precedence over query parameters, and
//! insertion order is preserved because the external-parameter arrays passed
//! to the database carry the full list in arrival order.

use bytes::Bytes;

use crate::error::{Error, Result};

/// Multipart bodies larger than this are rejected outright.
pub const MAX_FORM_BYTES: usize = 64 << 20;

/// One uploaded file part.
#[derive(Debug, Clone)]
pub struct FilePart {
    /// The form field the part arrived under.
    pub field_name: String,
    /// Filename as the client sent it.
    pub filename: String,
    pub content_type: String,
    pub content_disposition: String,
    pub content: Bytes,
}

/// The decoded form of one request.
#[derive(Debug, Clone, Default)]
pub struct ParsedForm {
    /// Body parameters followed by query parameters, in arrival order.
    pub params: Vec<(String, Vec<String>)>,
    /// Body parameters only; the wait/break interstitials re-render these as
    /// hidden inputs.
    pub post_params: Vec<(String, Vec<String>)>,
    /// File parts grouped by field name, in arrival order.
    pub files: Vec<(String, Vec<FilePart>)>,
}

impl ParsedForm {
    /// First value of a parameter, body before query.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .and_then(|(_, v)| v.first())
            .map(String::as_str)
    }
}

fn push_param(params: &mut Vec<(String, Vec<String>)>, name: String, value: String) {
    if let Some((_, vals)) = params.iter_mut().find(|(k, _)| *k == name) {
        vals.push(value);
    } else {
        params.push((name, vec![value]));
    }
}

fn parse_urlencoded(input: &[u8], params: &mut Vec<(String, Vec<String>)>) {
    for (key, value) in form_urlencoded::parse(input) {
        push_param(params, key.into_owned(), value.into_owned());
    }
}

/// Decode one request into a [`ParsedForm`].
///
/// `query` is the (already percent-normalized) raw query string;
/// `content_type` and `body` describe the request entity, if any.
pub async fn parse_request(
    query: &str,
    content_type: Option<&str>,
    body: Bytes,
) -> Result<ParsedForm> {
    let mut form = ParsedForm::default();

    let ct = content_type.unwrap_or_default();
    if ct.starts_with("multipart/form-data") {
        if body.len() > MAX_FORM_BYTES {
            return Err(Error::BadRequest(format!(
                "multipart body of {} bytes exceeds the {} byte limit",
                body.len(),
                MAX_FORM_BYTES
            )));
        }
        parse_multipart(ct, body, &mut form).await?;
    } else if ct.starts_with("application/x-www-form-urlencoded") {
        parse_urlencoded(&body, &mut form.post_params);
    }

    form.params = form.post_params.clone();
    parse_urlencoded(query.as_bytes(), &mut form.params);
    Ok(form)
}

async fn parse_multipart(content_type: &str, body: Bytes, form: &mut ParsedForm) -> Result<()> {
    let boundary = multer::parse_boundary(content_type)
        .map_err(|e| Error::BadRequest(format!("bad multipart boundary: {}", e)))?;
    let stream = futures::stream::once(async move {
        Ok::<Bytes, std::convert::Infallible>(body)
    });
    let mut multipart = multer::Multipart::new(stream, boundary);

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::BadRequest(format!("bad multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name.is_empty() {
            continue;
        }
        match field.file_name().map(str::to_string) {
            Some(filename) => {
                let content_type = field
                    .content_type()
                    .map(|m| m.to_string())
                    .unwrap_or_default();
                let disposition = field
                    .headers()
                    .get(http::header::CONTENT_DISPOSITION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
                    .unwrap_or_else(|| {
                        format!(
                            "form-data; name=\"{}\"; filename=\"{}\"",
                            name, filename
                        )
                    });
                let content = field
                    .bytes()
                    .await
                    .map_err(|e| Error::BadRequest(format!("bad multipart part: {}", e)))?;
                let part = FilePart {
                    field_name: name.clone(),
                    filename,
                    content_type,
                    content_disposition: disposition,
                    content,
                };
                if let Some((_, parts)) = form.files.iter_mut().find(|(k, _)| *k == name) {
                    parts.push(part);
                } else {
                    form.files.push((name, vec![part]));
                }
            }
            None => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| Error::BadRequest(format!("bad multipart part: {}", e)))?;
                push_param(&mut form.post_params, name, text);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn query_only_request() {
        let form = parse_request("ap=1&ap=2&b=x", None, Bytes::new())
            .await
            .unwrap();
        assert_eq!(
            form.params,
            vec![
                ("ap".to_string(), vec!["1".to_string(), "2".to_string()]),
                ("b".to_string(), vec!["x".to_string()])
            ]
        );
        assert!(form.post_params.is_empty());
        assert!(form.files.is_empty());
    }

    #[tokio::test]
    async fn urlencoded_body_precedes_query() {
        let form = parse_request(
            "q=2",
            Some("application/x-www-form-urlencoded"),
            Bytes::from_static(b"p=%D0%A2%D0%B5%D1%81%D1%82"),
        )
        .await
        .unwrap();
        assert_eq!(form.params[0], ("p".to_string(), vec!["Тест".to_string()]));
        assert_eq!(form.params[1], ("q".to_string(), vec!["2".to_string()]));
        assert_eq!(form.post_params.len(), 1);
    }

    #[tokio::test]
    async fn multipart_splits_text_and_files() {
        let body = concat!(
            "--XBOUND\r\n",
            "Content-Disposition: form-data; name=\"ap\"\r\n\r\n",
            "hello\r\n",
            "--XBOUND\r\n",
            "Content-Disposition: form-data; name=\"doc\"; filename=\"dir/r.txt\"\r\n",
            "Content-Type: text/plain\r\n\r\n",
            "file-body\r\n",
            "--XBOUND--\r\n"
        );
        let form = parse_request(
            "",
            Some("multipart/form-data; boundary=XBOUND"),
            Bytes::from_static(body.as_bytes()),
        )
        .await
        .unwrap();
        assert_eq!(form.value("ap"), Some("hello"));
        assert_eq!(form.files.len(), 1);
        let (field, parts) = &form.files[0];
        assert_eq!(field, "doc");
        assert_eq!(parts[0].filename, "dir/r.txt");
        assert_eq!(parts[0].content_type, "text/plain");
        assert_eq!(parts[0].content.as_ref(), b"file-body");
    }

    #[tokio::test]
    async fn oversized_multipart_is_rejected() {
        let huge = Bytes::from(vec![0u8; MAX_FORM_BYTES + 1]);
        let res = parse_request("", Some("multipart/form-data; boundary=x"), huge).await;
        assert!(res.is_err());
    }
}
