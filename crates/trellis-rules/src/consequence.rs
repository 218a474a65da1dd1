//! # Rule Consequences
//!
//! Interpretation of a rule's consequence templates.
//!
//! A consequence's detail is token-expanded by the engine before it is
//! interpreted here. Interpretation classifies the consequence into an
//! [`Outcome`]: a transformation of the triggering event (attach/modify),
//! a new event to dispatch, or a generic outbound consequence event.
//! Malformed consequences produce a [`RuleError`] and are skipped
//! individually by the engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use trellis_types::{Event, EventBuilder, EventSource, EventType, RuleError};

/// Consequence kind: merge payload into the triggering event.
pub const CONSEQUENCE_ATTACH: &str = "attach";

/// Consequence kind: overwrite the triggering event's payload.
pub const CONSEQUENCE_MODIFY: &str = "modify";

/// Consequence kind: dispatch a new event.
pub const CONSEQUENCE_DISPATCH: &str = "dispatch";

const DETAIL_EVENT_DATA: &str = "eventdata";
const DETAIL_TYPE: &str = "type";
const DETAIL_SOURCE: &str = "source";
const DETAIL_DATA_ACTION: &str = "eventdataaction";

const DATA_ACTION_COPY: &str = "copy";
const DATA_ACTION_NEW: &str = "new";

/// A templated consequence attached to a rule.
///
/// `detail` may contain `{%token%}` placeholders anywhere in its nested
/// strings; the kind is an open string so extensions can define their own
/// consequence types, which flow out as generic consequence events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consequence {
    /// Identifier used in logs when the consequence is skipped.
    pub id: String,
    /// Consequence kind (`attach`, `modify`, `dispatch`, or custom).
    pub kind: String,
    /// Kind-specific detail payload.
    pub detail: Value,
}

impl Consequence {
    /// An attach consequence merging `eventdata` into the triggering event.
    #[must_use]
    pub fn attach(id: impl Into<String>, eventdata: Value) -> Self {
        Self {
            id: id.into(),
            kind: CONSEQUENCE_ATTACH.to_string(),
            detail: serde_json::json!({ DETAIL_EVENT_DATA: eventdata }),
        }
    }

    /// A modify consequence overwriting the triggering event's payload.
    #[must_use]
    pub fn modify(id: impl Into<String>, eventdata: Value) -> Self {
        Self {
            id: id.into(),
            kind: CONSEQUENCE_MODIFY.to_string(),
            detail: serde_json::json!({ DETAIL_EVENT_DATA: eventdata }),
        }
    }

    /// A dispatch consequence copying the triggering event's payload.
    #[must_use]
    pub fn dispatch_copy(
        id: impl Into<String>,
        event_type: &EventType,
        source: &EventSource,
    ) -> Self {
        Self {
            id: id.into(),
            kind: CONSEQUENCE_DISPATCH.to_string(),
            detail: serde_json::json!({
                DETAIL_TYPE: event_type.as_str(),
                DETAIL_SOURCE: source.as_str(),
                DETAIL_DATA_ACTION: DATA_ACTION_COPY,
            }),
        }
    }

    /// A dispatch consequence carrying a new payload.
    #[must_use]
    pub fn dispatch_new(
        id: impl Into<String>,
        event_type: &EventType,
        source: &EventSource,
        eventdata: Value,
    ) -> Self {
        Self {
            id: id.into(),
            kind: CONSEQUENCE_DISPATCH.to_string(),
            detail: serde_json::json!({
                DETAIL_TYPE: event_type.as_str(),
                DETAIL_SOURCE: source.as_str(),
                DETAIL_DATA_ACTION: DATA_ACTION_NEW,
                DETAIL_EVENT_DATA: eventdata,
            }),
        }
    }
}

/// Classified result of interpreting one consequence.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Merge this payload into the triggering event, keeping existing keys.
    Attach(Value),
    /// Overwrite the triggering event's payload with this data.
    Modify(Value),
    /// Dispatch this new event (subject to the chain-depth guard).
    Dispatch(Event),
    /// Dispatch this generic consequence event.
    Generic(Event),
}

/// Interpret a token-expanded consequence against its triggering event.
pub fn interpret(consequence: &Consequence, trigger: &Event) -> Result<Outcome, RuleError> {
    if consequence.kind.is_empty() {
        return Err(RuleError::MissingConsequenceType {
            id: consequence.id.clone(),
        });
    }

    match consequence.kind.as_str() {
        CONSEQUENCE_ATTACH => Ok(Outcome::Attach(require_event_data(consequence)?)),
        CONSEQUENCE_MODIFY => Ok(Outcome::Modify(require_event_data(consequence)?)),
        CONSEQUENCE_DISPATCH => interpret_dispatch(consequence, trigger),
        _ => Ok(Outcome::Generic(generic_event(consequence))),
    }
}

fn interpret_dispatch(consequence: &Consequence, trigger: &Event) -> Result<Outcome, RuleError> {
    let event_type = require_string(consequence, DETAIL_TYPE)?;
    let source = require_string(consequence, DETAIL_SOURCE)?;
    let action = require_string(consequence, DETAIL_DATA_ACTION)?;

    let data = match action.as_str() {
        DATA_ACTION_COPY => trigger.data().clone(),
        DATA_ACTION_NEW => consequence
            .detail
            .get(DETAIL_EVENT_DATA)
            .cloned()
            .unwrap_or_else(|| Value::Object(serde_json::Map::new())),
        _ => {
            return Err(RuleError::InvalidDetailField {
                id: consequence.id.clone(),
                field: DETAIL_DATA_ACTION.to_string(),
            })
        }
    };

    let event = EventBuilder::new(
        "dispatched consequence",
        EventType::new(&event_type),
        EventSource::new(&source),
    )
    .data(data)
    .build();

    Ok(Outcome::Dispatch(event))
}

fn generic_event(consequence: &Consequence) -> Event {
    EventBuilder::new(
        "triggered consequence",
        EventType::rules_engine(),
        EventSource::response_content(),
    )
    .data(serde_json::json!({
        "triggeredconsequence": {
            "id": consequence.id,
            "type": consequence.kind,
            "detail": consequence.detail,
        }
    }))
    .build()
}

fn require_event_data(consequence: &Consequence) -> Result<Value, RuleError> {
    match consequence.detail.get(DETAIL_EVENT_DATA) {
        Some(value @ Value::Object(_)) => Ok(value.clone()),
        Some(_) => Err(RuleError::InvalidDetailField {
            id: consequence.id.clone(),
            field: DETAIL_EVENT_DATA.to_string(),
        }),
        None => Err(RuleError::MissingDetailField {
            id: consequence.id.clone(),
            field: DETAIL_EVENT_DATA.to_string(),
        }),
    }
}

fn require_string(consequence: &Consequence, field: &str) -> Result<String, RuleError> {
    match consequence.detail.get(field) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(_) => Err(RuleError::InvalidDetailField {
            id: consequence.id.clone(),
            field: field.to_string(),
        }),
        None => Err(RuleError::MissingDetailField {
            id: consequence.id.clone(),
            field: field.to_string(),
        }),
    }
}
