//! Interactive Adapter (§4.11): the bridge between a `PendingApproval` and
//! whatever surface actually asks the human -- a terminal prompt, a system
//! notification, a GUI dialog. The adapter never decides anything; it
//! sanitizes what's about to be displayed and hands a `Prompter`
//! implementation a value safe to render, then forwards the human's answer
//! back into the `ApprovalRegistry`.

use std::sync::Arc;

use async_trait::async_trait;
use authority_types::Request;

use crate::domain::approval::{ApprovalRegistry, ApprovalResponse, PendingApproval};
use crate::domain::errors::CoreResult;
use crate::domain::permission::GrantDuration;
use crate::domain::risk::AuthLevel;
use crate::ports::outbound::Approver;

const TRUNCATE_LEN: usize = 500;

/// Strips characters that could spoof or obscure a prompt when rendered:
/// C0 controls and DEL, bidi override/embedding/isolate controls, stray
/// joiners, and combining marks that could stack onto a preceding glyph.
/// Truncates to 500 chars after filtering.
pub fn sanitize_for_display(input: &str) -> String {
    let filtered: String = input
        .chars()
        .filter(|&c| {
            let is_c0_or_del = c == '\u{7F}' || (c as u32) < 0x20;
            let is_bidi_control = matches!(c,
                '\u{200E}' | '\u{200F}' |
                '\u{202A}'..='\u{202E}' |
                '\u{2060}'..='\u{206F}' |
                '\u{FEFF}'
            );
            let is_combining_mark = matches!(c, '\u{0300}'..='\u{036F}');
            !is_c0_or_del && !is_bidi_control && !is_combining_mark
        })
        .collect();
    filtered.chars().take(TRUNCATE_LEN).collect()
}

/// The sanitized, display-ready projection of a `PendingApproval`. The
/// prompter renders only this -- never the raw `Request` -- so a caller
/// can't smuggle terminal-control or bidi tricks into the approval prompt.
#[derive(Clone, Debug)]
pub struct DisplayApproval {
    pub id: String,
    pub caller: String,
    pub request_type: String,
    pub event_kind: Option<u16>,
    pub content_preview: String,
    pub is_connect: bool,
    pub required_auth_level: AuthLevel,
    pub allowed_durations: Vec<GrantDuration>,
}

/// Grant durations a prompter may offer for this request. `Forever` is
/// withheld for sensitive kinds (§3): the Permission Store would silently
/// downgrade it to `OneDay` anyway, but the prompt shouldn't offer a
/// choice it won't honor.
fn allowed_durations(event_kind: Option<u16>) -> Vec<GrantDuration> {
    let forever_allowed = match event_kind {
        Some(kind) => !authority_types::is_sensitive_kind(kind),
        None => true,
    };
    let mut durations = vec![
        GrantDuration::JustThisTime,
        GrantDuration::OneHour,
        GrantDuration::OneDay,
        GrantDuration::OneWeek,
    ];
    if forever_allowed {
        durations.push(GrantDuration::Forever);
    }
    durations
}

fn content_preview(request: &Request) -> String {
    let raw = String::from_utf8_lossy(&request.content);
    sanitize_for_display(&raw)
}

/// The actual human-facing surface. Implemented once per frontend (CLI
/// prompt, desktop notification, mobile push) and injected into the
/// adapter; the adapter itself has no opinion about how a prompt is
/// rendered.
#[async_trait]
pub trait Prompter: Send + Sync {
    async fn prompt(&self, display: DisplayApproval);
}

/// Implements `Approver` by sanitizing the pending request for display and
/// delegating the actual prompt to a `Prompter`. Resolution flows back
/// through `resolve`, which just forwards to the registry -- the adapter
/// holds no approval state of its own.
pub struct InteractiveAdapter {
    registry: Arc<ApprovalRegistry>,
    prompter: Arc<dyn Prompter>,
}

impl InteractiveAdapter {
    pub fn new(registry: Arc<ApprovalRegistry>, prompter: Arc<dyn Prompter>) -> Self {
        Self { registry, prompter }
    }

    pub fn resolve(&self, id: &str, response: ApprovalResponse) -> bool {
        self.registry.resolve(id, response)
    }

    pub fn deny_all_pending(&self) {
        self.registry.shutdown();
    }
}

#[async_trait]
impl Approver for InteractiveAdapter {
    async fn notify_pending(&self, pending: &PendingApproval) {
        let display = DisplayApproval {
            id: pending.id.clone(),
            caller: sanitize_for_display(&pending.caller),
            request_type: pending.request.request_type.as_str().to_string(),
            event_kind: pending.request.event_kind,
            content_preview: content_preview(&pending.request),
            is_connect: pending.is_connect,
            required_auth_level: pending.required_auth_level,
            allowed_durations: allowed_durations(pending.request.event_kind),
        };
        self.prompter.prompt(display).await;
    }
}

pub type AdapterResult<T> = CoreResult<T>;
