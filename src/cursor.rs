//! Opaque page cursors for multi-phase Grants/List pagination.
//!
//! A Grants enumeration for one resource often spans several sequential
//! upstream phases (for example `owners` then `members`). The connector
//! remembers which phase is active, and where pagination left off inside
//! it, in a stack of [`PhaseState`] entries serialized into a single
//! opaque string that the caller round-trips between sync cycles.
//!
//! The encoding is a small versioned JSON envelope so that future phase
//! additions do not silently break cursors issued before a schema change;
//! an unknown version decodes to [`AzureError::MalformedCursor`], never a
//! panic. The empty string is the canonical encoding of the empty stack
//! and means "first page of the default phase".

use serde::{Deserialize, Serialize};

use crate::error::{AzureError, AzureResult};

/// Cursor envelope version understood by this build.
const CURSOR_VERSION: u32 = 1;

/// One phase of a multi-phase enumeration: a tag naming the sub-task, the
/// upstream continuation token for it (a next-link URL or an
/// application-level marker), and an optional correlation id for phases
/// that are scoped to a sub-object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseState {
    pub phase: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl PhaseState {
    pub fn new(phase: impl Into<String>) -> Self {
        Self {
            phase: phase.into(),
            token: None,
            correlation_id: None,
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    v: u32,
    phases: Vec<PhaseState>,
}

/// A LIFO stack of [`PhaseState`]s. The top of the stack is the active
/// phase; phases are therefore pushed in the reverse of their desired
/// execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageCursor {
    phases: Vec<PhaseState>,
}

impl PageCursor {
    /// An empty cursor: no phases, encodes to the empty string.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses an opaque cursor string. Empty input yields an empty stack.
    ///
    /// # Errors
    ///
    /// Returns [`AzureError::MalformedCursor`] if the string is not a
    /// cursor envelope this build understands.
    pub fn decode(opaque: &str) -> AzureResult<Self> {
        if opaque.is_empty() {
            return Ok(Self::default());
        }

        let envelope: Envelope = serde_json::from_str(opaque)
            .map_err(|e| AzureError::MalformedCursor(format!("invalid cursor encoding: {e}")))?;

        if envelope.v != CURSOR_VERSION {
            return Err(AzureError::MalformedCursor(format!(
                "unsupported cursor version {}",
                envelope.v
            )));
        }

        Ok(Self {
            phases: envelope.phases,
        })
    }

    /// Serializes the stack back into an opaque string. Exact inverse of
    /// [`PageCursor::decode`]; an empty stack encodes to the empty string,
    /// which is the termination signal callers poll for.
    pub fn encode(&self) -> AzureResult<String> {
        if self.phases.is_empty() {
            return Ok(String::new());
        }

        let envelope = Envelope {
            v: CURSOR_VERSION,
            phases: self.phases.clone(),
        };
        Ok(serde_json::to_string(&envelope)?)
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    /// Pushes a phase onto the top of the stack. The last phase pushed is
    /// the first one processed.
    pub fn push_phase(&mut self, phase: PhaseState) {
        self.phases.push(phase);
    }

    /// The active phase, or `None` when no work remains.
    pub fn current_phase(&self) -> Option<&PhaseState> {
        self.phases.last()
    }

    /// Replaces the continuation token of the active phase in place. Used
    /// when a sub-page is drained but the phase has more pages. No-op on an
    /// empty stack.
    pub fn replace_current_token(&mut self, token: Option<String>) {
        if let Some(top) = self.phases.last_mut() {
            top.token = token;
        }
    }

    /// Removes and returns the active phase. Used when a phase is fully
    /// drained and the enumeration advances to the next one.
    pub fn pop_phase(&mut self) -> Option<PhaseState> {
        self.phases.pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_decodes_to_empty_stack() {
        let cursor = PageCursor::decode("").unwrap();
        assert!(cursor.is_empty());
        assert!(cursor.current_phase().is_none());
    }

    #[test]
    fn empty_stack_encodes_to_empty_string() {
        assert_eq!(PageCursor::new().encode().unwrap(), "");
    }

    #[test]
    fn round_trip_preserves_stack() {
        let mut cursor = PageCursor::new();
        cursor.push_phase(PhaseState::new("members"));
        cursor.push_phase(
            PhaseState::new("owners")
                .with_token("https://graph.microsoft.com/beta/groups/g1/owners?$skiptoken=abc")
                .with_correlation_id("g1"),
        );

        let encoded = cursor.encode().unwrap();
        let decoded = PageCursor::decode(&encoded).unwrap();
        assert_eq!(decoded, cursor);
    }

    #[test]
    fn last_pushed_is_first_processed() {
        let mut cursor = PageCursor::new();
        cursor.push_phase(PhaseState::new("members"));
        cursor.push_phase(PhaseState::new("owners"));

        assert_eq!(cursor.current_phase().unwrap().phase, "owners");
        assert_eq!(cursor.pop_phase().unwrap().phase, "owners");
        assert_eq!(cursor.current_phase().unwrap().phase, "members");
    }

    #[test]
    fn replace_current_token_updates_top_only() {
        let mut cursor = PageCursor::new();
        cursor.push_phase(PhaseState::new("members"));
        cursor.push_phase(PhaseState::new("owners"));

        cursor.replace_current_token(Some("next".into()));
        assert_eq!(cursor.current_phase().unwrap().token.as_deref(), Some("next"));

        cursor.pop_phase();
        assert_eq!(cursor.current_phase().unwrap().token, None);
    }

    #[test]
    fn garbage_input_is_malformed_cursor() {
        let err = PageCursor::decode("not a cursor").unwrap_err();
        assert!(matches!(err, AzureError::MalformedCursor(_)));
    }

    #[test]
    fn unknown_version_is_malformed_cursor() {
        let err = PageCursor::decode(r#"{"v":99,"phases":[]}"#).unwrap_err();
        assert!(matches!(err, AzureError::MalformedCursor(_)));
    }

    #[test]
    fn decode_empty_is_idempotent() {
        for _ in 0..3 {
            assert!(PageCursor::decode("").unwrap().is_empty());
        }
    }
}
