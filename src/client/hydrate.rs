//! Hydration controller (v0.1)
//!
//! Walks the live document container by container. A container is
//! awaiting (observed, not yet probed) until the host reports it in the
//! viewport; it is then probed for its type token and either reaffirmed
//! (token unchanged) or refilled from the fragment for the new token.
//!
//! All document state sits behind one `parking_lot` mutex that is never held
//! across an `.await`: every step snapshots what it needs, awaits the
//! transport, then re-checks that its nodes are still connected.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, instrument, warn};
use url::Url;

use super::cache::MemoCache;
use super::tracker::{collect, control_value, has_role, Controls, FileValue, TrackerPayload, ELEMENT_ATTR, TRACKER_ATTR};
use super::transport::Transport;
use super::{ClientError, ClientResult};
use crate::config::{NullsConfig, ROOT_ADDRESS};
use crate::error::NullsError;
use crate::exchange::{Exchange, Request};
use crate::html::{Document, Element, NodeId};
use crate::script::{compile_source, is_truthy, run_source, stringify, Program};
use crate::store::{ID_ATTR, ROLE_ATTR, TYPE_ATTR};
use crate::wire::{
    CONTAINER_PREFIX, DATA_PREFIX, DUMMY_PREFIX, FRAGMENT_PREFIX, HANDLER_PREFIX, LOAD_PREFIX, PARSER_PREFIX,
    REQUEST_PREFIX, TITLE_PATH, VALIDATOR_PREFIX,
};

pub const AWAITING_CLASS: &str = "null-awaiting";
const LINK_ATTR: &str = "null-link";
const REFRESH_ATTR: &str = "null-refresh";
const CACHE_ATTR: &str = "null-cache";
const LOADS_ATTR: &str = "null-loads";
const AFTER_ATTR: &str = "null-after";
const INDEX_ATTR: &str = "null-index";

const LOCATION_BASE: &str = "http://localhost";

// ============================================================================
// PUBLIC STATE TYPES
// ============================================================================

/// Current page location as the server sees it in tracker payloads
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    pub path: String,
    /// Query string including the leading '?', or empty
    pub search: String,
}

impl Location {
    /// Resolve `href` relative to this location
    pub fn join(&self, href: &str) -> ClientResult<Location> {
        let invalid = || ClientError::InvalidHref {
            href: href.to_string(),
        };
        let base = Url::parse(&format!("{}{}", LOCATION_BASE, self.href())).map_err(|_| invalid())?;
        let url = base.join(href).map_err(|_| invalid())?;
        Ok(Location {
            path: url.path().to_string(),
            search: url.query().map(|q| format!("?{}", q)).unwrap_or_default(),
        })
    }

    pub fn href(&self) -> String {
        format!("{}{}", self.path, self.search)
    }

    fn payload(&self) -> TrackerPayload {
        TrackerPayload::new(&self.path, &self.search)
    }
}

/// History entry pushed by programmatic navigation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub href: String,
    /// Entries pushed by someone else carry no title and are ignored on pop
    pub title: Option<String>,
}

/// One-shot viewport observation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Hydrate the container at this address
    Container { address: String },
    /// Request the next page for a loader owned by this container
    Loader { owner: String },
}

/// Click behaviour bound to an element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    Link { href: String },
    Request { owner: String },
}

// ============================================================================
// DOCUMENT HELPERS
// ============================================================================

/// Containers and the root element delimit hydration scopes
fn is_scope(el: &Element) -> bool {
    el.attr(ID_ATTR) == Some(ROOT_ADDRESS)
        || el
            .attr(ROLE_ATTR)
            .is_some_and(|roles| roles.split_whitespace().any(|r| r == "container"))
}

fn root_element(doc: &Document) -> NodeId {
    doc.find_first(doc.root(), |el| el.attr(ID_ATTR) == Some(ROOT_ADDRESS))
        .or_else(|| doc.find_first(doc.root(), |el| el.name == "body"))
        .unwrap_or_else(|| doc.root())
}

/// Nearest enclosing scope of `node`
fn owner_of(doc: &Document, node: NodeId) -> NodeId {
    doc.closest_ancestor(node, is_scope)
        .unwrap_or_else(|| root_element(doc))
}

/// Scopes around `node`, innermost first, ending at the root element
fn stack_of(doc: &Document, node: NodeId) -> Vec<NodeId> {
    let root = root_element(doc);
    let mut stack = Vec::new();
    if doc.element(node).is_some_and(is_scope) {
        stack.push(node);
    }
    let mut cur = node;
    while let Some(scope) = doc.closest_ancestor(cur, is_scope) {
        stack.push(scope);
        cur = scope;
    }
    if !stack.contains(&root) {
        stack.push(root);
    }
    stack
}

/// Server address: the address without `.element` suffixes
pub(crate) fn strip(address: &str) -> String {
    address
        .split('/')
        .map(|seg| seg.split_once('.').map(|(id, _)| id).unwrap_or(seg))
        .collect::<Vec<_>>()
        .join("/")
}

/// Find the live container for a slash-delimited address
pub(crate) fn resolve(doc: &Document, address: &str) -> Option<NodeId> {
    let mut segments = address.split('/');
    if segments.next() != Some(ROOT_ADDRESS) {
        return None;
    }
    let mut cur = root_element(doc);
    for segment in segments {
        let (id, element) = match segment.split_once('.') {
            Some((id, el)) => (id, Some(el)),
            None => (segment, None),
        };
        let scope = cur;
        cur = doc
            .select(scope, |el| {
                el.attr(ID_ATTR) == Some(id)
                    && is_scope(el)
                    && element.map_or(true, |e| el.attr(ELEMENT_ATTR) == Some(e))
            })
            .into_iter()
            .find(|n| owner_of(doc, *n) == scope)?;
    }
    Some(cur)
}

fn child_address(doc: &Document, address: &str, node: NodeId) -> Option<String> {
    let id = doc.attr(node, ID_ATTR)?;
    Some(match doc.attr(node, ELEMENT_ATTR) {
        Some(el) => format!("{}/{}.{}", address, id, el),
        None => format!("{}/{}", address, id),
    })
}

fn is_control(doc: &Document, node: NodeId) -> bool {
    matches!(doc.tag(node), Some("input" | "textarea" | "select"))
}

/// Display text of a script result; null reads as empty
fn text(value: &Value) -> String {
    if value.is_null() {
        String::new()
    } else {
        stringify(value)
    }
}

fn script_err(e: NullsError) -> ClientError {
    ClientError::Script(e.to_string())
}

fn malformed(path: &str, reason: impl ToString) -> ClientError {
    ClientError::Transport {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_json(path: &str, body: &str) -> ClientResult<Value> {
    serde_json::from_str(body).map_err(|e| malformed(path, e))
}

// ============================================================================
// CONTROLLER
// ============================================================================

#[derive(Debug)]
struct State {
    doc: Document,
    location: Location,
    title: String,
    history: Vec<HistoryEntry>,
    observers: HashMap<NodeId, Trigger>,
    bindings: HashMap<NodeId, Binding>,
    controls: Controls,
    /// Loaders with a continuation request in flight
    pending: HashSet<NodeId>,
}

struct Probe {
    path: String,
    payload: TrackerPayload,
    current: Option<String>,
}

struct DataJob {
    node: NodeId,
    generation: u32,
    key: String,
    cached: bool,
    payload: ClientResult<TrackerPayload>,
}

struct LoadJob {
    generation: u32,
    key: String,
    template: String,
    loads: Option<String>,
    after: bool,
    payload: TrackerPayload,
}

enum Page {
    End,
    Next(Option<String>),
}

pub struct Controller {
    transport: Arc<dyn Transport>,
    state: Mutex<State>,
    /// Last applied type token per container address
    types: DashMap<String, String>,
    fragments: MemoCache<String>,
    dummies: MemoCache<String>,
    parsers: MemoCache<Arc<Program>>,
    handlers: MemoCache<Arc<Program>>,
    /// Data answers keyed `<key>#<validator token>`
    data: MemoCache<Value>,
}

impl Controller {
    /// Controller over a server-rendered document loaded at `href`
    ///
    /// Every fetch cache holds at most `config.client_cache_capacity` entries.
    pub fn new(
        transport: Arc<dyn Transport>,
        doc: Document,
        href: &str,
        config: &NullsConfig,
    ) -> ClientResult<Self> {
        let location = Location::default().join(href)?;
        let title = doc
            .find_first(doc.root(), |el| el.name == "title")
            .map(|t| doc.text_content(t))
            .unwrap_or_default();
        let capacity = config.client_cache_capacity;
        Ok(Self {
            transport,
            state: Mutex::new(State {
                doc,
                location,
                title,
                history: Vec::new(),
                observers: HashMap::new(),
                bindings: HashMap::new(),
                controls: Controls::default(),
                pending: HashSet::new(),
            }),
            types: DashMap::new(),
            fragments: MemoCache::new(capacity),
            dummies: MemoCache::new(capacity),
            parsers: MemoCache::new(capacity),
            handlers: MemoCache::new(capacity),
            data: MemoCache::new(capacity),
        })
    }

    // ═══════════════════════════════════════════
    // INSPECTION
    // ═══════════════════════════════════════════

    pub fn with_document<R>(&self, f: impl FnOnce(&Document) -> R) -> R {
        f(&self.state.lock().doc)
    }

    pub fn html(&self) -> String {
        self.state.lock().doc.to_html()
    }

    pub fn location(&self) -> Location {
        self.state.lock().location.clone()
    }

    pub fn title(&self) -> String {
        self.state.lock().title.clone()
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.state.lock().history.clone()
    }

    /// Last applied type token of a container
    pub fn type_of(&self, address: &str) -> Option<String> {
        self.types.get(address).map(|t| t.clone())
    }

    pub fn trigger(&self, node: NodeId) -> Option<Trigger> {
        self.state.lock().observers.get(&node).cloned()
    }

    pub fn binding(&self, node: NodeId) -> Option<Binding> {
        self.state.lock().bindings.get(&node).cloned()
    }

    /// Nodes currently waiting for a viewport intersection
    pub fn observed(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self.state.lock().observers.keys().copied().collect();
        nodes.sort_unstable();
        nodes
    }

    /// Current value of a form control
    pub fn value(&self, node: NodeId) -> String {
        let st = self.state.lock();
        control_value(&st.doc, &st.controls, node)
    }

    // ═══════════════════════════════════════════
    // HOST EVENTS
    // ═══════════════════════════════════════════

    /// Hydrate the page from the root container
    pub async fn start(&self) -> ClientResult<()> {
        self.hydrate(ROOT_ADDRESS, false).await
    }

    pub fn set_value(&self, node: NodeId, value: impl Into<String>) {
        self.state.lock().controls.values.insert(node, value.into());
    }

    pub fn set_files(&self, node: NodeId, files: Vec<FileValue>) {
        self.state.lock().controls.files.insert(node, files);
    }

    /// `node` entered the viewport; fires its observation at most once
    pub async fn intersect(&self, node: NodeId) -> ClientResult<()> {
        let trigger = self.state.lock().observers.remove(&node);
        match trigger {
            None => Ok(()),
            Some(Trigger::Container { address }) => self.hydrate(&address, false).await,
            Some(Trigger::Loader { owner }) => self.load(node, owner).await,
        }
    }

    /// `node` was clicked; the nearest bound element handles it
    pub async fn click(&self, node: NodeId) -> ClientResult<()> {
        let bound = {
            let st = self.state.lock();
            let mut cur = Some(node);
            let mut found = None;
            while let Some(n) = cur {
                if let Some(binding) = st.bindings.get(&n) {
                    found = Some((n, binding.clone()));
                    break;
                }
                cur = st.doc.parent(n);
            }
            found
        };
        match bound {
            None => Ok(()),
            Some((link, Binding::Link { href })) => self.go(&href, Some(link)).await,
            Some((target, Binding::Request { owner })) => self.request(target, &owner).await,
        }
    }

    /// Programmatic navigation to `href`
    pub async fn navigate(&self, href: &str) -> ClientResult<()> {
        self.go(href, None).await
    }

    /// Back/forward to a history entry
    pub async fn pop_state(&self, entry: HistoryEntry) -> ClientResult<()> {
        let Some(title) = entry.title else {
            debug!(href = %entry.href, "ignoring foreign history entry");
            return Ok(());
        };
        {
            let mut st = self.state.lock();
            st.location = st.location.join(&entry.href)?;
            st.title = title;
        }
        self.hydrate(ROOT_ADDRESS, false).await
    }

    // ═══════════════════════════════════════════
    // HYDRATION
    // ═══════════════════════════════════════════

    /// Probe the container at `address` and bring its content up to date
    ///
    /// A container that no longer exists is skipped silently.
    #[instrument(skip(self))]
    pub async fn hydrate(&self, address: &str, force: bool) -> ClientResult<()> {
        let Some(probe) = self.prepare_probe(address)? else {
            debug!("container is gone");
            return Ok(());
        };
        let token = self.transport.post(&probe.path, &probe.payload).await?;
        let reaffirmed = !force && probe.current.as_deref() == Some(token.as_str());
        if reaffirmed {
            debug!(token = %token, "type unchanged");
        } else {
            let key = format!("{}/{}", strip(address), token);
            let path = format!("{}{}.html", FRAGMENT_PREFIX, key);
            let html = self.fetch_text(&self.fragments, &key, path.clone()).await?;
            if !self.apply_fragment(address, &token, &path, &html)? {
                return Ok(());
            }
            debug!(token = %token, "content replaced");
        }
        let jobs = self.settle(address, reaffirmed)?;
        self.refresh_data(jobs).await
    }

    fn known_type(&self, doc: &Document, address: &str, node: NodeId) -> Option<String> {
        self.type_of(address)
            .or_else(|| doc.attr(node, TYPE_ATTR).map(str::to_string))
    }

    fn prepare_probe(&self, address: &str) -> ClientResult<Option<Probe>> {
        let st = self.state.lock();
        let doc = &st.doc;
        let Some(node) = resolve(doc, address) else {
            return Ok(None);
        };
        let path = match address.rsplit_once('/') {
            None => format!("{}{}", CONTAINER_PREFIX, ROOT_ADDRESS),
            Some((parent_address, _)) => {
                let parent = owner_of(doc, node);
                let parent_type =
                    self.known_type(doc, parent_address, parent)
                        .ok_or_else(|| ClientError::MissingType {
                            address: parent_address.to_string(),
                        })?;
                format!(
                    "{}{}/{}/{}",
                    CONTAINER_PREFIX,
                    strip(parent_address),
                    parent_type,
                    doc.attr(node, ID_ATTR).unwrap_or_default()
                )
            }
        };
        let payload = collect(doc, &st.controls, &stack_of(doc, node), node, st.location.payload())?;
        Ok(Some(Probe {
            path,
            payload,
            current: self.known_type(doc, address, node),
        }))
    }

    /// Swap in a fragment; `false` when the container vanished meanwhile
    fn apply_fragment(&self, address: &str, token: &str, path: &str, html: &str) -> ClientResult<bool> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(node) = resolve(&state.doc, address) else {
            return Ok(false);
        };
        state
            .doc
            .set_inner_html(node, html)
            .map_err(|e| malformed(path, e))?;
        state.doc.set_attr(node, TYPE_ATTR, token);
        self.types.insert(address.to_string(), token.to_string());

        let prefix = format!("{}/", address);
        self.types.retain(|k, _| !k.starts_with(&prefix));

        let doc = &state.doc;
        state.observers.retain(|n, _| doc.is_connected(*n));
        state.bindings.retain(|n, _| doc.is_connected(*n));
        state.pending.retain(|n| doc.is_connected(*n));
        state.controls.values.retain(|n, _| doc.is_connected(*n));
        state.controls.files.retain(|n, _| doc.is_connected(*n));
        let freed = state.doc.reclaim();
        debug!(address, freed, "fragment applied");
        Ok(true)
    }

    /// Rescan the scope of `address` and list its data slots to fetch
    fn settle(&self, address: &str, refresh_only: bool) -> ClientResult<Vec<DataJob>> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(scope) = resolve(&state.doc, address) else {
            return Ok(Vec::new());
        };
        state.doc.remove_class(scope, AWAITING_CLASS);
        rescan(state, scope, address);

        let doc = &state.doc;
        let slots: Vec<NodeId> = doc
            .descendants(scope)
            .into_iter()
            .filter(|n| has_role(doc, *n, "data") && owner_of(doc, *n) == scope)
            .filter(|n| !refresh_only || doc.has_attr(*n, REFRESH_ATTR))
            .collect();
        if slots.is_empty() {
            return Ok(Vec::new());
        }
        let owner_type = self
            .known_type(doc, address, scope)
            .ok_or_else(|| ClientError::MissingType {
                address: address.to_string(),
            })?;
        let template = format!("{}/{}", strip(address), owner_type);
        Ok(slots
            .into_iter()
            .map(|node| DataJob {
                node,
                generation: doc.generation(node),
                key: format!("{}/{}", template, doc.attr(node, ID_ATTR).unwrap_or_default()),
                cached: doc.has_attr(node, CACHE_ATTR),
                payload: collect(doc, &state.controls, &stack_of(doc, node), node, state.location.payload()),
            })
            .collect())
    }

    /// Fetch data slots in document order; the first failure is reported
    /// after every slot has been tried
    async fn refresh_data(&self, jobs: Vec<DataJob>) -> ClientResult<()> {
        let mut first = None;
        for job in jobs {
            let key = job.key.clone();
            if let Err(e) = self.fetch_data(job).await {
                warn!(slot = %key, error = %e, "data refresh failed");
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }

    async fn fetch_data(&self, job: DataJob) -> ClientResult<()> {
        let payload = job.payload?;
        let path = format!("{}{}", DATA_PREFIX, job.key);
        let value = if job.cached {
            let validator = format!("{}{}", VALIDATOR_PREFIX, job.key);
            let token = self.transport.post(&validator, &payload).await?;
            let transport = Arc::clone(&self.transport);
            self.data
                .get_or_fetch(&format!("{}#{}", job.key, token), move || async move {
                    let body = transport.post(&path, &payload).await?;
                    parse_json(&path, &body)
                })
                .await?
        } else {
            let body = self.transport.post(&path, &payload).await?;
            parse_json(&path, &body)?
        };

        let parser = self
            .program(&self.parsers, format!("{}{}.js", PARSER_PREFIX, job.key))
            .await?;
        let exchange = self.exchange();
        let result = run_source(&parser, &exchange, &[value])
            .await
            .map_err(script_err)?;

        let mut st = self.state.lock();
        if st.doc.is_live(job.node, job.generation) {
            st.doc.set_text(job.node, &text(&result));
        }
        Ok(())
    }

    // ═══════════════════════════════════════════
    // LOADERS
    // ═══════════════════════════════════════════

    async fn load(&self, node: NodeId, owner: String) -> ClientResult<()> {
        let (generation, result) = match self.prepare_load(node, &owner) {
            Ok(Some(job)) => (Some(job.generation), self.next_page(node, &owner, job).await),
            Ok(None) => return Ok(()),
            Err(e) => (None, Err(e)),
        };
        {
            let mut st = self.state.lock();
            // the loader may have been swapped out and its id reused meanwhile
            let current = generation.map_or(true, |g| st.doc.generation(node) == g);
            if current {
                st.pending.remove(&node);
                let exhausted = matches!(result, Ok(Page::End));
                if !exhausted && st.doc.is_connected(node) {
                    st.observers.insert(node, Trigger::Loader { owner });
                }
            }
        }
        match result? {
            Page::Next(Some(address)) => self.hydrate(&address, false).await,
            _ => Ok(()),
        }
    }

    fn prepare_load(&self, node: NodeId, owner: &str) -> ClientResult<Option<LoadJob>> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let doc = &state.doc;
        if !doc.is_connected(node) {
            return Ok(None);
        }
        let owner_node = owner_of(doc, node);
        let owner_type = self
            .known_type(doc, owner, owner_node)
            .ok_or_else(|| ClientError::MissingType {
                address: owner.to_string(),
            })?;
        let template = format!("{}/{}", strip(owner), owner_type);
        let mut payload = collect(doc, &state.controls, &stack_of(doc, node), node, state.location.payload())?;
        payload.push("index", doc.attr(node, INDEX_ATTR).unwrap_or("-1"));
        let job = LoadJob {
            generation: doc.generation(node),
            key: format!("{}/{}", template, doc.attr(node, ID_ATTR).unwrap_or_default()),
            template,
            loads: doc.attr(node, LOADS_ATTR).map(str::to_string),
            after: doc.has_attr(node, AFTER_ATTR),
            payload,
        };
        state.pending.insert(node);
        Ok(Some(job))
    }

    /// Ask for the next page and insert its placeholder
    async fn next_page(&self, node: NodeId, owner: &str, job: LoadJob) -> ClientResult<Page> {
        let token = self
            .transport
            .post(&format!("{}{}", LOAD_PREFIX, job.key), &job.payload)
            .await?;
        if token.is_empty() {
            debug!(loader = %job.key, "pagination finished");
            return Ok(Page::End);
        }
        let Some(loads) = job.loads else {
            let mut st = self.state.lock();
            if st.doc.is_live(node, job.generation) {
                st.doc.set_attr(node, INDEX_ATTR, token);
            }
            return Ok(Page::Next(None));
        };
        let key = format!("{}/{}", job.template, loads);
        let path = format!("{}{}.html", DUMMY_PREFIX, key);
        let html = self.fetch_text(&self.dummies, &key, path.clone()).await?;
        let dummy = Document::parse(&html).map_err(|e| malformed(&path, e))?;

        let mut st = self.state.lock();
        let doc = &mut st.doc;
        let Some(parent) = doc.parent(node).filter(|_| doc.is_live(node, job.generation)) else {
            return Ok(Page::Next(None));
        };
        doc.set_attr(node, INDEX_ATTR, token.clone());
        let reference = if job.after {
            let siblings = doc.children(parent);
            siblings
                .iter()
                .position(|c| *c == node)
                .and_then(|p| siblings.get(p + 1).copied())
        } else {
            Some(node)
        };
        let inserted = doc.graft(parent, &dummy, reference);
        if let Some(item) = inserted.into_iter().find(|n| doc.element(*n).is_some()) {
            doc.set_attr(item, ELEMENT_ATTR, token.clone());
            doc.add_class(item, AWAITING_CLASS);
        }
        Ok(Page::Next(Some(format!("{}/{}.{}", owner, loads, token))))
    }

    // ═══════════════════════════════════════════
    // REQUESTS & NAVIGATION
    // ═══════════════════════════════════════════

    async fn request(&self, node: NodeId, owner: &str) -> ClientResult<()> {
        let (key, payload, generation) = {
            let st = self.state.lock();
            let doc = &st.doc;
            let owner_node = owner_of(doc, node);
            let owner_type = self
                .known_type(doc, owner, owner_node)
                .ok_or_else(|| ClientError::MissingType {
                    address: owner.to_string(),
                })?;
            let key = format!(
                "{}/{}/{}",
                strip(owner),
                owner_type,
                doc.attr(node, ID_ATTR).unwrap_or_default()
            );
            let payload = collect(doc, &st.controls, &stack_of(doc, node), node, st.location.payload())?;
            (key, payload, doc.generation(node))
        };

        let path = format!("{}{}", REQUEST_PREFIX, key);
        let answer = parse_json(&path, &self.transport.post(&path, &payload).await?)?;
        let handler = self
            .program(&self.handlers, format!("{}{}.js", HANDLER_PREFIX, key))
            .await?;
        let exchange = self.exchange();
        let result = run_source(&handler, &exchange, &[answer])
            .await
            .map_err(script_err)?;
        let Value::Object(assignments) = result else {
            return Ok(());
        };

        let mut navigate = None;
        let mut refresh = false;
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let stack = if state.doc.is_live(node, generation) {
                stack_of(&state.doc, node)
            } else {
                debug!(request = %key, "request element left the page");
                Vec::new()
            };
            for (name, value) in assignments {
                match name.as_str() {
                    "$navigate" => navigate = Some(text(&value)),
                    "$refresh" => refresh = is_truthy(&value),
                    _ => assign(state, &stack, &name, &value),
                }
            }
        }
        if refresh {
            self.hydrate(owner, true).await?;
        }
        if let Some(href) = navigate {
            self.go(&href, None).await?;
        }
        Ok(())
    }

    /// Fetch the destination title, push history, then re-hydrate from the root
    async fn go(&self, href: &str, link: Option<NodeId>) -> ClientResult<()> {
        let (target, payload) = {
            let st = self.state.lock();
            let target = st.location.join(href)?;
            let payload = match link {
                Some(n) => collect(&st.doc, &st.controls, &stack_of(&st.doc, n), n, target.payload())?,
                None => target.payload(),
            };
            (target, payload)
        };
        let title = self.transport.post(TITLE_PATH, &payload).await?;
        {
            let mut st = self.state.lock();
            st.history.push(HistoryEntry {
                href: target.href(),
                title: Some(title.clone()),
            });
            st.location = target;
            st.title = title;
        }
        self.hydrate(ROOT_ADDRESS, false).await
    }

    // ═══════════════════════════════════════════
    // FETCH HELPERS
    // ═══════════════════════════════════════════

    async fn fetch_text(&self, cache: &MemoCache<String>, key: &str, path: String) -> ClientResult<String> {
        let transport = Arc::clone(&self.transport);
        cache
            .get_or_fetch(key, move || async move { transport.get(&path).await })
            .await
    }

    /// Compiled parser or handler source, evaluated once per path
    async fn program(&self, cache: &MemoCache<Arc<Program>>, path: String) -> ClientResult<Arc<Program>> {
        let transport = Arc::clone(&self.transport);
        let key = path.clone();
        cache
            .get_or_fetch(&key, move || async move {
                let source = transport.get(&path).await?;
                compile_source(&source).map(Arc::new).map_err(script_err)
            })
            .await
    }

    /// Request view handed to client scripts
    fn exchange(&self) -> Exchange {
        let href = self.state.lock().location.href();
        Exchange::new(Request::get(&href))
    }
}

/// Arm observers and bindings for the nodes owned by `scope`
fn rescan(state: &mut State, scope: NodeId, address: &str) {
    let owned: Vec<NodeId> = state
        .doc
        .descendants(scope)
        .into_iter()
        .filter(|n| state.doc.element(*n).is_some() && owner_of(&state.doc, *n) == scope)
        .collect();
    for node in owned {
        let doc = &mut state.doc;
        if has_role(doc, node, "container") {
            if let Some(child) = child_address(doc, address, node) {
                doc.add_class(node, AWAITING_CLASS);
                state
                    .observers
                    .insert(node, Trigger::Container { address: child });
            }
        }
        if let Some(link) = doc.attr(node, LINK_ATTR) {
            let href = match link {
                "" => doc.attr(node, "href").unwrap_or_default(),
                href => href,
            };
            state.bindings.insert(
                node,
                Binding::Link {
                    href: href.to_string(),
                },
            );
        }
        if has_role(doc, node, "request") {
            state.bindings.insert(
                node,
                Binding::Request {
                    owner: address.to_string(),
                },
            );
        }
        if has_role(doc, node, "loader") && !state.pending.contains(&node) {
            state.observers.insert(
                node,
                Trigger::Loader {
                    owner: address.to_string(),
                },
            );
        }
    }
}

/// Write a handler result into the tracker element called `name`
fn assign(state: &mut State, stack: &[NodeId], name: &str, value: &Value) {
    let doc = &state.doc;
    let target = stack.iter().find_map(|&scope| {
        if doc.attr(scope, TRACKER_ATTR) == Some(name) {
            Some(scope)
        } else {
            doc.find_first(scope, |el| el.attr(TRACKER_ATTR) == Some(name))
        }
    });
    let Some(node) = target else {
        warn!(tracker = name, "handler assigned an unknown tracker");
        return;
    };
    if is_control(doc, node) {
        state.controls.values.insert(node, text(value));
    } else {
        state.doc.set_text(node, &text(value));
    }
}
