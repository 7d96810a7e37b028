use mailparse::{parse_mail, MailHeaderMap, ParsedMail};

use crate::error::ParseError;

/// The readable body chosen from a MIME message, HTML preferred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Html(String),
    Plain(String),
}

/// Sender, subject and date headers used to select receipt mails from a mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub from: String,
    pub subject: String,
    /// Seconds since the Unix epoch, when the `Date` header parses.
    pub date: Option<i64>,
}

/// Decodes the MIME tree and returns the first `text/html` part, falling back to the
/// first `text/plain` part. Transfer encodings and charsets are undone by mailparse.
pub fn message_body(raw: &[u8]) -> Result<MessageBody, ParseError> {
    let mail = parse_mail(raw).map_err(|e| ParseError::Mime(e.to_string()))?;

    if let Some(html) = find_part(&mail, "text/html") {
        return Ok(MessageBody::Html(html));
    }
    if let Some(plain) = find_part(&mail, "text/plain") {
        return Ok(MessageBody::Plain(plain));
    }
    Err(ParseError::NoReadableBody)
}

pub fn envelope(raw: &[u8]) -> Result<Envelope, ParseError> {
    let (headers, _) = mailparse::parse_headers(raw).map_err(|e| ParseError::Mime(e.to_string()))?;
    let date = headers
        .get_first_value("Date")
        .and_then(|d| mailparse::dateparse(&d).ok());
    Ok(Envelope {
        from: headers.get_first_value("From").unwrap_or_default(),
        subject: headers.get_first_value("Subject").unwrap_or_default(),
        date,
    })
}

fn find_part(mail: &ParsedMail, mimetype: &str) -> Option<String> {
    if mail.subparts.is_empty() && mail.ctype.mimetype.eq_ignore_ascii_case(mimetype) {
        if let Ok(body) = mail.get_body() {
            if !body.trim().is_empty() {
                return Some(body);
            }
        }
    }
    mail.subparts.iter().find_map(|part| find_part(part, mimetype))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALTERNATIVE: &str = "From: no_reply@email.apple.com\r\n\
To: user@example.com\r\n\
Subject: Your receipt from Apple.\r\n\
Date: Sat, 24 Jan 2026 10:00:00 +0000\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/alternative; boundary=\"b1\"\r\n\
\r\n\
--b1\r\n\
Content-Type: text/plain; charset=\"utf-8\"\r\n\
\r\n\
Fallback plain text\r\n\
--b1\r\n\
Content-Type: text/html; charset=\"utf-8\"\r\n\
Content-Transfer-Encoding: quoted-printable\r\n\
\r\n\
<p class=3D\"x\">Long App =E2=80=93 Extremely Long Subscription Plan Name Extr=\r\n\
emely Long</p>\r\n\
--b1--\r\n";

    #[test]
    fn html_part_is_preferred_and_decoded() {
        let body = message_body(ALTERNATIVE.as_bytes()).unwrap();
        match body {
            MessageBody::Html(html) => {
                assert!(html.contains("<p class=\"x\">"), "{html}");
                assert!(html.contains("\u{2013} Extremely Long Subscription Plan Name Extremely Long"), "{html}");
            }
            other => panic!("expected html, got {other:?}"),
        }
    }

    #[test]
    fn plain_part_used_when_no_html() {
        let raw = "Subject: Receipt\r\nContent-Type: text/plain\r\n\r\nOrder ID: ABC123\r\n";
        let body = message_body(raw.as_bytes()).unwrap();
        assert!(
            matches!(&body, MessageBody::Plain(text) if text.trim() == "Order ID: ABC123"),
            "{body:?}"
        );
    }

    #[test]
    fn envelope_reads_headers() {
        let env = envelope(ALTERNATIVE.as_bytes()).unwrap();
        assert_eq!(env.from, "no_reply@email.apple.com");
        assert_eq!(env.subject, "Your receipt from Apple.");
        assert_eq!(env.date, Some(1_769_248_800));
    }
}
