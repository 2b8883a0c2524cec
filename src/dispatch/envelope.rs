use serde_json::Value;

/// One inbound frame: a JSON object with exactly one top-level key.
///
/// The key names the message kind; the value is the opaque body. If the kind
/// is the reserved literal `command` (case-insensitive), the body itself is
/// a bare command name and resolves to the handler; otherwise the kind does.
#[derive(Debug, Clone)]
pub struct MessageEnvelope {
    kind: String,
    body: Value,
}

impl MessageEnvelope {
    /// Parse a frame. Anything that is not a single-key JSON object is not
    /// an envelope and is dropped by the dispatcher.
    pub fn parse(text: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(text).ok()?;
        let object = value.as_object()?;
        if object.len() != 1 {
            return None;
        }

        let (kind, body) = object.iter().next()?;
        Some(Self {
            kind: kind.clone(),
            body: body.clone(),
        })
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    /// Resolve the handler name: the command body for `command` envelopes,
    /// the kind itself otherwise. A `command` envelope whose body is not a
    /// string resolves to nothing.
    pub fn handler_key(&self) -> Option<&str> {
        if self.kind.eq_ignore_ascii_case("command") {
            self.body.as_str()
        } else {
            Some(&self.kind)
        }
    }
}
