//! Minimal MIME composer: plain text, or multipart/mixed with base64
//! attachments.

use std::fmt::Write as _;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

/// Subject used when the caller leaves it blank.
pub const DEFAULT_SUBJECT: &str = "CERES onboarding";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

impl Attachment {
    #[must_use]
    pub fn new(filename: &str, content_type: &str, data: Vec<u8>) -> Self {
        Self {
            filename: filename.to_string(),
            content_type: content_type.to_string(),
            data,
        }
    }

    fn name(&self) -> &str {
        match self.filename.trim() {
            "" => "attachment",
            name => name,
        }
    }

    fn mime_type(&self) -> &str {
        match self.content_type.trim() {
            "" => "application/octet-stream",
            ct => ct,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<Attachment>,
}

impl Message {
    /// Render with a boundary derived from the current time.
    #[must_use]
    pub fn compose(&self) -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        self.compose_with_boundary(&format!("ceres-{nanos}"))
    }

    #[must_use]
    pub fn compose_with_boundary(&self, boundary: &str) -> String {
        let subject = match self.subject.trim() {
            "" => DEFAULT_SUBJECT,
            s => s,
        };
        let mut out = String::new();
        let _ = writeln!(out, "From: {}", self.from);
        let _ = writeln!(out, "To: {}", self.to.join(", "));
        let _ = writeln!(out, "Subject: {subject}");
        out.push_str("MIME-Version: 1.0\n");

        if self.attachments.is_empty() {
            out.push_str("Content-Type: text/plain; charset=utf-8\n\n");
            let _ = writeln!(out, "{}", self.body);
            return out;
        }

        let _ = writeln!(out, "Content-Type: multipart/mixed; boundary=\"{boundary}\"\n");
        let _ = writeln!(out, "--{boundary}");
        out.push_str("Content-Type: text/plain; charset=utf-8\n\n");
        let _ = writeln!(out, "{}", self.body);

        for attachment in &self.attachments {
            let name = attachment.name();
            let _ = writeln!(out, "--{boundary}");
            let _ = writeln!(out, "Content-Type: {}; name=\"{name}\"", attachment.mime_type());
            out.push_str("Content-Transfer-Encoding: base64\n");
            let _ = writeln!(out, "Content-Disposition: attachment; filename=\"{name}\"\n");
            out.push_str(&wrap76(&STANDARD.encode(&attachment.data)));
            out.push('\n');
        }
        let _ = writeln!(out, "--{boundary}--");
        out
    }
}

/// Split into lines of at most 76 characters.
#[must_use]
pub fn wrap76(encoded: &str) -> String {
    encoded
        .as_bytes()
        .chunks(76)
        .map(|chunk| String::from_utf8_lossy(chunk))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Trim entries and split comma-separated lists, dropping blanks.
#[must_use]
pub fn normalize_recipients<S: AsRef<str>>(items: &[S]) -> Vec<String> {
    items
        .iter()
        .flat_map(|item| item.as_ref().split(','))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(attachments: Vec<Attachment>) -> Message {
        Message {
            from: "admin@ceres.local".into(),
            to: vec!["ops@example.com".into(), "dev@example.com".into()],
            subject: "Welcome".into(),
            body: "Hello from Ceres".into(),
            attachments,
        }
    }

    #[test]
    fn test_plain_message_headers_and_body() {
        let text = message(Vec::new()).compose();
        let (headers, body) = text.split_once("\n\n").unwrap();
        assert!(headers.contains("From: admin@ceres.local"));
        assert!(headers.contains("To: ops@example.com, dev@example.com"));
        assert!(headers.contains("Subject: Welcome"));
        assert!(headers.contains("Content-Type: text/plain; charset=utf-8"));
        assert_eq!(body, "Hello from Ceres\n");
    }

    #[test]
    fn test_blank_subject_defaults() {
        let mut msg = message(Vec::new());
        msg.subject = "  ".into();
        assert!(msg.compose().contains("Subject: CERES onboarding\n"));
    }

    #[test]
    fn test_attachment_decodes_to_original_bytes() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let text = message(vec![Attachment::new("ca.crt", "", data.clone())])
            .compose_with_boundary("ceres-1");

        assert!(text.contains("Content-Type: multipart/mixed; boundary=\"ceres-1\""));
        assert!(text.contains("Content-Type: application/octet-stream; name=\"ca.crt\""));
        assert!(text.trim_end().ends_with("--ceres-1--"));

        let part = text.split("--ceres-1\n").nth(2).unwrap();
        let (_, encoded) = part.split_once("\n\n").unwrap();
        let encoded = encoded.split("--ceres-1--").next().unwrap();
        assert!(encoded.lines().all(|l| l.len() <= 76));
        let joined: String = encoded.lines().collect();
        assert_eq!(STANDARD.decode(joined).unwrap(), data);
    }

    #[test]
    fn test_unnamed_attachment() {
        let text = message(vec![Attachment::new(" ", "text/plain", b"x".to_vec())])
            .compose_with_boundary("b");
        assert!(text.contains("filename=\"attachment\""));
    }

    #[test]
    fn test_normalize_recipients() {
        assert_eq!(
            normalize_recipients(&[" a@x.io, b@x.io ", "", ",c@x.io"]),
            vec!["a@x.io", "b@x.io", "c@x.io"]
        );
    }
}
