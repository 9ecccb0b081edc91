//! Per-request hydration data.
//!
//! During a server render every flow subscription registers the value it
//! rendered under its subscription id.  Once the markup has been produced,
//! [`HydrationRegistry::get_script`] turns the queued registrations into an
//! inline script which, when run in the browser, hands the same values to
//! the client.  The client then loads that script into its own registry so
//! the hydrating pass renders exactly what the server rendered, before
//! moving on to whatever the live flows hold.
//!
//! The registry is not global state.  One is created per request (or per
//! page load on the client), provided as a Leptos context with
//! [`provide`](HydrationRegistry::provide) and looked up by the hooks with
//! [`current`](HydrationRegistry::current).  Without one in context the
//! hooks simply render live values.
//!
//! # Script format
//!
//! ```text
//! <script nonce="...">self.__flow_merge({"0":{...},"3":1});self.__flow_deref({"5":"0"})</script>
//! ```
//!
//! `__flow_merge` receives the values keyed by subscription id.
//! `__flow_deref` receives ids whose value is identical to one already
//! sent, mapped to the id that carried it; the alias may point at a value
//! sent by an earlier script of the same request.  Both arguments are JSON
//! with `<` escaped so a value can never close the script element.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use leptos::context::{provide_context, use_context};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

use crate::{error::FlowError, flow::SourceKey};

const MERGE_CALL: &str = "self.__flow_merge(";
const DEREF_CALL: &str = "self.__flow_deref(";

/// Hydration data for one request.  Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct HydrationRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

#[derive(Default)]
struct RegistryInner {
    nonce: Option<String>,
    queued: Vec<Registration>,
    flushed: HashSet<String>,
    // canonical JSON of every value already sent, to the id that sent it
    sent_values: HashMap<String, String>,
    // every value received from the server by id, kept for resolving aliases
    delivered: HashMap<String, Value>,
    recalled: HashMap<String, Value>,
}

struct Registration {
    id: String,
    source: Option<SourceKey>,
    value: Value,
}

impl HydrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry whose scripts carry the `nonce` attribute, for pages
    /// served under a content security policy.
    pub fn with_nonce(nonce: impl Into<String>) -> Self {
        let registry = Self::default();
        registry.lock().nonce = Some(nonce.into());
        registry
    }

    /// Client-side registry loaded from the scripts emitted by the server,
    /// in the order they were emitted.
    pub fn from_scripts<'a>(
        scripts: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, FlowError> {
        let registry = Self::default();
        for script in scripts {
            registry.load_script(script)?;
        }
        Ok(registry)
    }

    /// Acquire the registry provided for the current request, if any.
    ///
    /// This make use of [`use_context`], so it looks up the registry
    /// provided to the current reactive owner or any of its ancestors.
    pub fn current() -> Option<Self> {
        use_context::<HydrationRegistry>()
    }

    /// Provide this registry as a context to the current reactive owner.
    pub fn provide(&self) {
        provide_context(self.clone());
    }

    pub fn get_nonce(&self) -> Option<String> {
        self.lock().nonce.clone()
    }

    /// Queue `value` to be sent to the client under `id`.
    ///
    /// Registering an id that is still queued replaces the queued value, as
    /// happens when a server render is retried after a suspension.  An id
    /// that was already sent keeps the value the client received.
    pub fn register(&self, id: impl Into<String>, source: Option<SourceKey>, value: Value) {
        let id = id.into();
        let mut inner = self.lock();
        if inner.flushed.contains(&id) {
            leptos::logging::warn!(
                "hydration value for `{id}` was already sent to the client; ignoring the new \
                 registration"
            );
            return;
        }
        match inner.queued.iter_mut().find(|registration| registration.id == id) {
            Some(registration) => {
                registration.source = source;
                registration.value = value;
            }
            None => inner.queued.push(Registration { id, source, value }),
        }
    }

    pub(crate) fn register_value<V: Serialize + ?Sized>(
        &self,
        id: &str,
        source: Option<SourceKey>,
        value: &V,
    ) -> Result<(), FlowError> {
        let value = serde_json::to_value(value).map_err(|error| FlowError::Serialize {
            id: id.to_string(),
            message: error.to_string(),
        })?;
        self.register(id, source, value);
        Ok(())
    }

    /// Take the value the server sent for `id`.  Each value is handed out
    /// at most once.
    pub fn hydrate(&self, id: &str) -> Option<Value> {
        self.lock().recalled.remove(id)
    }

    /// Decode the value the server sent for `id` without taking it.
    ///
    /// A hydrating pass may be thrown away before it commits, so the hooks
    /// only [`hydrate`](Self::hydrate) the value once their first commit
    /// went through.  A value that does not decode is dropped.
    pub(crate) fn recall_as<V: DeserializeOwned>(&self, id: &str) -> Option<V> {
        let mut inner = self.lock();
        let value = inner.recalled.get(id)?.clone();
        match serde_json::from_value(value) {
            Ok(value) => Some(value),
            Err(error) => {
                leptos::logging::warn!(
                    "discarding hydration value for `{id}` that does not decode: {error}"
                );
                inner.recalled.remove(id);
                None
            }
        }
    }

    /// Number of registrations not yet emitted by [`get_script`](Self::get_script).
    pub fn queued(&self) -> usize {
        self.lock().queued.len()
    }

    /// Serialize the queued registrations, either all of them or only
    /// those registered for `source`, into an inline script and remove them
    /// from the queue.
    ///
    /// Returns `None` when there was nothing to emit.
    pub fn get_script(&self, source: Option<SourceKey>) -> Option<String> {
        let mut inner = self.lock();
        let (emit, keep): (Vec<_>, Vec<_>) = std::mem::take(&mut inner.queued)
            .into_iter()
            .partition(|registration| source.is_none() || registration.source == source);
        inner.queued = keep;
        if emit.is_empty() {
            return None;
        }

        let mut values = Map::new();
        let mut aliases = Map::new();
        for Registration { id, value, .. } in emit {
            let canonical = value.to_string();
            let sent_as = inner.sent_values.get(&canonical).cloned();
            match sent_as {
                Some(target) => {
                    aliases.insert(id.clone(), Value::String(target));
                }
                None => {
                    inner.sent_values.insert(canonical, id.clone());
                    values.insert(id.clone(), value);
                }
            }
            inner.flushed.insert(id);
        }

        let mut body = String::new();
        if !values.is_empty() {
            body.push_str(MERGE_CALL);
            body.push_str(&escape_json(&Value::Object(values)));
            body.push(')');
        }
        if !aliases.is_empty() {
            if !body.is_empty() {
                body.push(';');
            }
            body.push_str(DEREF_CALL);
            body.push_str(&escape_json(&Value::Object(aliases)));
            body.push(')');
        }

        Some(match &inner.nonce {
            Some(nonce) => format!(
                r#"<script nonce="{}">{body}</script>"#,
                escape_attribute(nonce)
            ),
            None => format!("<script>{body}</script>"),
        })
    }

    /// Load one script produced by [`get_script`](Self::get_script), making
    /// its values available to [`hydrate`](Self::hydrate).
    pub fn load_script(&self, script: &str) -> Result<(), FlowError> {
        let body = script_body(script)?;
        let mut inner = self.lock();
        let mut rest = body;
        loop {
            rest = rest.trim_start_matches(|c: char| c == ';' || c.is_whitespace());
            if rest.is_empty() {
                return Ok(());
            }
            let (merge, after) = if let Some(after) = rest.strip_prefix(MERGE_CALL) {
                (true, after)
            } else if let Some(after) = rest.strip_prefix(DEREF_CALL) {
                (false, after)
            } else {
                return Err(FlowError::MalformedScript(format!(
                    "unexpected statement at `{}`",
                    rest.chars().take(32).collect::<String>()
                )));
            };

            let mut stream = serde_json::Deserializer::from_str(after).into_iter::<Map<String, Value>>();
            let entries = match stream.next() {
                Some(Ok(entries)) => entries,
                Some(Err(error)) => return Err(FlowError::MalformedScript(error.to_string())),
                None => return Err(FlowError::MalformedScript("missing argument".to_string())),
            };
            let consumed = stream.byte_offset();
            rest = after[consumed..]
                .strip_prefix(')')
                .ok_or_else(|| FlowError::MalformedScript("unterminated call".to_string()))?;

            for (id, value) in entries {
                let value = if merge {
                    value
                } else {
                    let target = value.as_str().ok_or_else(|| {
                        FlowError::MalformedScript(format!("alias for `{id}` is not an id"))
                    })?;
                    inner.delivered.get(target).cloned().ok_or_else(|| {
                        FlowError::MalformedScript(format!(
                            "alias for `{id}` names unknown `{target}`"
                        ))
                    })?
                };
                inner.delivered.insert(id.clone(), value.clone());
                inner.recalled.insert(id, value);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for HydrationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("HydrationRegistry")
            .field("queued", &inner.queued.len())
            .field("flushed", &inner.flushed.len())
            .field("recalled", &inner.recalled.len())
            .finish()
    }
}

fn escape_json(value: &Value) -> String {
    value.to_string().replace('<', "\\u003c")
}

fn escape_attribute(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Byte offset just past the `>` closing the opening tag, skipping over
/// quoted attribute values.
fn opening_tag_end(tag: &str) -> Option<usize> {
    let mut quote = None;
    for (offset, c) in tag.char_indices() {
        match (quote, c) {
            (Some(open), c) if c == open => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '>') => return Some(offset + 1),
            (None, _) => {}
        }
    }
    None
}

fn script_body(script: &str) -> Result<&str, FlowError> {
    let script = script.trim();
    let attributes = script
        .strip_prefix("<script")
        .filter(|rest| rest.starts_with(|c: char| c == '>' || c.is_ascii_whitespace()))
        .ok_or_else(|| FlowError::MalformedScript("missing opening script tag".to_string()))?;
    let body = opening_tag_end(attributes)
        .map(|end| &attributes[end..])
        .ok_or_else(|| FlowError::MalformedScript("unterminated opening script tag".to_string()))?;
    body.strip_suffix("</script>")
        .ok_or_else(|| FlowError::MalformedScript("missing closing script tag".to_string()))
}
