//! Multi-phase grants orchestration.
//!
//! A single resource's grants enumeration can span several sequential
//! upstream phases (group `owners` then `members`; storage role
//! `assignments` then per-role `actions`). [`GrantsOrchestrator`] drives
//! exactly one phase-page per invocation and returns an opaque cursor the
//! caller round-trips, so a sync engine can interleave, suspend and resume
//! resources freely between cycles.
//!
//! The orchestrator never mutates the caller's cursor string: it decodes
//! into an owned [`PageCursor`] and encodes a new one only after a
//! successful page, so a failed or abandoned call leaves the input cursor
//! valid for retry.

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::cursor::{PageCursor, PhaseState};
use crate::error::{AzureError, AzureResult};
use crate::grants::GrantRecord;

/// Upstream page-size ceiling under which a phase is assumed exhausted.
pub const SMALL_PAGE_THRESHOLD: usize = 50;

/// One fetched phase-page: translated grants, the raw upstream record
/// count (before classification drops), and the upstream continuation.
#[derive(Debug, Default)]
pub struct PhasePage {
    pub grants: Vec<GrantRecord>,
    pub records_fetched: usize,
    pub next_token: Option<String>,
}

/// Fetches one page of a named phase and translates its records into
/// grants. Implemented per resource builder; the phase tag in the state
/// selects which upstream listing (and which classification strictness)
/// applies.
#[async_trait]
pub trait PhaseSource: Send + Sync {
    async fn fetch(&self, phase: &PhaseState) -> AzureResult<PhasePage>;
}

/// Result of one orchestrator invocation. An empty `next_cursor` means the
/// enumeration is complete.
#[derive(Debug)]
pub struct GrantsPage {
    pub grants: Vec<GrantRecord>,
    pub next_cursor: String,
}

/// Drives one phase-page per call over a [`PhaseSource`].
pub struct GrantsOrchestrator<S> {
    source: S,
    small_page_short_circuit: bool,
}

impl<S: PhaseSource> GrantsOrchestrator<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            small_page_short_circuit: true,
        }
    }

    /// Disables or re-enables the small-page short-circuit. On by default:
    /// a page of at most [`SMALL_PAGE_THRESHOLD`] records is taken as
    /// evidence the phase is exhausted and any continuation the upstream
    /// still offered is discarded. Halves request volume on small
    /// collections at a small truncation risk if upstream page sizing is
    /// non-monotonic.
    #[must_use]
    pub fn with_small_page_short_circuit(mut self, enabled: bool) -> Self {
        self.small_page_short_circuit = enabled;
        self
    }

    /// Produces the next page of grants.
    ///
    /// `seed_phases` lists the phases for this resource in execution
    /// order; it is consulted only when `opaque_cursor` is empty. The
    /// phases are pushed onto the stack in reverse so the first listed
    /// phase is processed first.
    ///
    /// Upstream `NotFound` mid-enumeration means the object was deleted
    /// between the list and grants calls; the phase is treated as having
    /// produced zero records and the enumeration advances. Delete races
    /// under eventual consistency are expected, not exceptional.
    #[instrument(skip(self, seed_phases), fields(cursor_len = opaque_cursor.len()))]
    pub async fn next_page(
        &self,
        opaque_cursor: &str,
        seed_phases: &[PhaseState],
    ) -> AzureResult<GrantsPage> {
        let mut cursor = PageCursor::decode(opaque_cursor)?;

        if cursor.is_empty() && opaque_cursor.is_empty() {
            for phase in seed_phases.iter().rev() {
                cursor.push_phase(phase.clone());
            }
        }

        let Some(current) = cursor.current_phase().cloned() else {
            // Drained: the termination condition the caller polls for.
            return Ok(GrantsPage {
                grants: Vec::new(),
                next_cursor: String::new(),
            });
        };

        let page = match self.source.fetch(&current).await {
            Ok(page) => page,
            Err(AzureError::NotFound(detail)) => {
                warn!(phase = %current.phase, %detail, "phase target no longer exists, skipping phase");
                cursor.pop_phase();
                return Ok(GrantsPage {
                    grants: Vec::new(),
                    next_cursor: cursor.encode()?,
                });
            }
            Err(err) => return Err(err),
        };

        let mut next_token = page.next_token;
        if self.small_page_short_circuit
            && next_token.is_some()
            && page.records_fetched <= SMALL_PAGE_THRESHOLD
        {
            debug!(
                phase = %current.phase,
                records = page.records_fetched,
                "small page, assuming phase exhausted and dropping continuation"
            );
            next_token = None;
        }

        match next_token {
            Some(token) => cursor.replace_current_token(Some(token)),
            None => {
                cursor.pop_phase();
            }
        }

        Ok(GrantsPage {
            grants: page.grants,
            next_cursor: cursor.encode()?,
        })
    }
}
