//! SOAP 1.2 envelopes, WS-Security and response parsing for ONVIF services.

use crate::error::{ControlError, Result};
use base64::Engine;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use rand::Rng;
use sha1::{Digest, Sha1};

pub const CONTENT_TYPE: &str = "application/soap+xml; charset=utf-8";

/// Wrap `body` in an envelope declaring every ONVIF namespace the client uses.
pub fn envelope(body: &str, security_header: Option<&str>) -> String {
    let header = security_header
        .map(|h| format!("\n  <s:Header>\n    {}\n  </s:Header>", h))
        .unwrap_or_default();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope"
            xmlns:tds="http://www.onvif.org/ver10/device/wsdl"
            xmlns:trt="http://www.onvif.org/ver10/media/wsdl"
            xmlns:tptz="http://www.onvif.org/ver20/ptz/wsdl"
            xmlns:timg="http://www.onvif.org/ver20/imaging/wsdl"
            xmlns:tt="http://www.onvif.org/ver10/schema">{}
  <s:Body>
    {}
  </s:Body>
</s:Envelope>"#,
        header, body
    )
}

/// WS-Security UsernameToken with PasswordDigest, fresh nonce per request.
pub fn ws_security_header(username: &str, password: &str) -> String {
    let nonce: [u8; 16] = rand::thread_rng().gen();
    let created = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
    username_token(username, password, &nonce, &created)
}

fn username_token(username: &str, password: &str, nonce: &[u8], created: &str) -> String {
    let b64 = base64::engine::general_purpose::STANDARD;
    format!(
        r#"<wsse:Security s:mustUnderstand="1" xmlns:wsse="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd" xmlns:wsu="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd">
      <wsse:UsernameToken>
        <wsse:Username>{}</wsse:Username>
        <wsse:Password Type="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-username-token-profile-1.0#PasswordDigest">{}</wsse:Password>
        <wsse:Nonce EncodingType="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-soap-message-security-1.0#Base64Binary">{}</wsse:Nonce>
        <wsu:Created>{}</wsu:Created>
      </wsse:UsernameToken>
    </wsse:Security>"#,
        escape(username),
        password_digest(nonce, created, password),
        b64.encode(nonce),
        created
    )
}

/// `Base64(SHA1(nonce + created + password))`
pub fn password_digest(nonce: &[u8], created: &str, password: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(nonce);
    hasher.update(created.as_bytes());
    hasher.update(password.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

pub fn escape(value: &str) -> String {
    quick_xml::escape::escape(value).into_owned()
}

/// Minimal element tree. Names are local names; namespace prefixes vary by
/// vendor so matching never looks at them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmlElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    /// Parse a document. The returned element is a nameless document node.
    pub fn parse(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut stack = vec![XmlElement::default()];
        loop {
            match reader.read_event() {
                Ok(Event::Start(start)) => stack.push(Self::from_start(&start)?),
                Ok(Event::Empty(start)) => {
                    let element = Self::from_start(&start)?;
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(element);
                    }
                }
                Ok(Event::Text(text)) => {
                    let text = text
                        .unescape()
                        .map_err(|e| ControlError::Protocol(format!("bad XML text: {e}")))?;
                    if let Some(current) = stack.last_mut() {
                        current.text.push_str(&text);
                    }
                }
                Ok(Event::CData(data)) => {
                    if let Some(current) = stack.last_mut() {
                        current
                            .text
                            .push_str(&String::from_utf8_lossy(&data.into_inner()));
                    }
                }
                Ok(Event::End(_)) => {
                    let element = stack.pop();
                    match (element, stack.last_mut()) {
                        (Some(element), Some(parent)) => parent.children.push(element),
                        _ => {
                            return Err(ControlError::Protocol(
                                "unbalanced closing tag in response".to_string(),
                            ))
                        }
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    return Err(ControlError::Protocol(format!(
                        "malformed XML at byte {}: {e}",
                        reader.buffer_position()
                    )))
                }
            }
        }

        match (stack.pop(), stack.is_empty()) {
            (Some(document), true) if !document.children.is_empty() => Ok(document),
            (Some(_), true) => Err(ControlError::Protocol("empty response body".to_string())),
            _ => Err(ControlError::Protocol("unclosed element in response".to_string())),
        }
    }

    fn from_start(start: &BytesStart<'_>) -> Result<Self> {
        let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr =
                attr.map_err(|e| ControlError::Protocol(format!("bad attribute on <{name}>: {e}")))?;
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| ControlError::Protocol(format!("bad attribute value: {e}")))?
                .into_owned();
            attributes.push((key, value));
        }
        Ok(Self {
            name,
            attributes,
            ..Default::default()
        })
    }

    /// First descendant (depth-first, document order) named `name`.
    pub fn find(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find_map(|child| {
            if child.name == name {
                Some(child)
            } else {
                child.find(name)
            }
        })
    }

    /// Every descendant named `name`, not descending into matches.
    pub fn find_all(&self, name: &str) -> Vec<&XmlElement> {
        let mut found = Vec::new();
        self.collect(name, &mut found);
        found
    }

    fn collect<'a>(&'a self, name: &str, found: &mut Vec<&'a XmlElement>) {
        for child in &self.children {
            if child.name == name {
                found.push(child);
            } else {
                child.collect(name, found);
            }
        }
    }

    /// Direct child named `name`.
    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Trimmed text of the first descendant named `name`.
    pub fn text_of(&self, name: &str) -> Option<&str> {
        self.find(name).map(|e| e.text.trim())
    }
}

/// A SOAP fault pulled out of a response.
#[derive(Debug, Clone, PartialEq)]
pub struct SoapFault {
    /// Code and subcode values, e.g. `["env:Sender", "ter:NotAuthorized"]`
    pub codes: Vec<String>,
    pub reason: String,
}

impl SoapFault {
    pub fn from_document(document: &XmlElement) -> Option<Self> {
        let fault = document.find("Fault")?;
        let codes = fault
            .find_all("Value")
            .into_iter()
            .map(|v| v.text.trim().to_string())
            .chain(fault.text_of("faultcode").map(str::to_string))
            .collect();
        let reason = fault
            .find("Reason")
            .and_then(|r| r.text_of("Text"))
            .or_else(|| fault.text_of("faultstring"))
            .unwrap_or("unspecified fault")
            .to_string();
        Some(Self { codes, reason })
    }

    pub fn is_not_authorized(&self) -> bool {
        self.codes.iter().any(|c| c.ends_with("NotAuthorized"))
            || self.reason.to_lowercase().contains("not authorized")
    }
}

impl From<SoapFault> for ControlError {
    fn from(fault: SoapFault) -> Self {
        if fault.is_not_authorized() {
            ControlError::Auth(fault.reason)
        } else {
            ControlError::Protocol(format!("{} ({})", fault.reason, fault.codes.join(", ")))
        }
    }
}
