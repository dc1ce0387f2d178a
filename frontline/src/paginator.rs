use std::ops::ControlFlow;
use std::time::Duration;

use futures::Stream;
use futures::StreamExt;
use futures::TryStreamExt;
use futures::pin_mut;
use futures::stream;
use serde_json::Map;
use serde_json::Value;
use tokio::time::sleep;
use tower_frontline::Event;
use tower_frontline::FrontError;
use tracing::debug;

use crate::params::Params;
use crate::transport::Transport;

const OFFSET_ITEM_KEYS: [&str; 4] = ["data", "contacts", "contact_books", "contact_groups"];
const UNTIL_ITEM_KEYS: [&str; 4] = ["data", "conversations", "messages", "comments"];
const MESSAGE_TIMESTAMPS: &[&str] = &["delivered_at", "created_at", "updated_at"];
const TIMESTAMPS: &[&str] = &["created_at", "updated_at"];
const DEFAULT_LIMIT: u64 = 50;

/// Bounds on a page walk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageOptions {
    pub max_pages: Option<usize>,
    /// Offset style only: never request an offset past this.
    pub max_offset: Option<u64>,
    /// Pause between page fetches.
    pub sleep_interval: Option<Duration>,
}

/// Bounds on an item walk.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemOptions {
    pub max_items: Option<usize>,
    /// Key of the item array in each page.
    pub data_key: String,
    pub pages: PageOptions,
}

impl Default for ItemOptions {
    fn default() -> Self {
        Self {
            max_items: None,
            data_key: "data".to_string(),
            pages: PageOptions::default(),
        }
    }
}

/// How an endpoint continues from one page to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationStyle {
    /// `offset` + `limit`, done when a page comes back short.
    Offset,
    /// An `until` cursor, taken from `next.until` or the last item's timestamp.
    Until,
}

impl PaginationStyle {
    /// Offset style when the page carries both `offset` and `limit`.
    pub fn detect(page: &Value) -> Self {
        if page.get("offset").is_some() && page.get("limit").is_some() {
            Self::Offset
        } else {
            Self::Until
        }
    }
}

/// What to request after a page, if anything.
#[derive(Debug, Clone, PartialEq)]
enum Continuation {
    Offset { offset: u64, limit: u64 },
    Until(String),
    Done,
}

/// Walks multi-page collections through a [`Transport`].
///
/// The pagination style is detected from the first page and kept for the rest
/// of the walk. Errors from the transport end the walk and are passed through
/// untouched.
#[derive(Debug, Clone, Copy)]
pub struct Paginator<'a> {
    transport: &'a Transport,
}

struct Walk<'a> {
    transport: &'a Transport,
    path: String,
    params: Params,
    options: PageOptions,
    style: Option<PaginationStyle>,
    fetched: usize,
    done: bool,
}

impl<'a> Paginator<'a> {
    pub fn new(transport: &'a Transport) -> Self {
        Self { transport }
    }

    /// Every page of `path`, in order.
    ///
    /// Nothing is requested until the stream is polled, and dropping it stops
    /// the walk.
    pub fn pages(
        &self,
        path: &str,
        params: Params,
        options: PageOptions,
    ) -> impl Stream<Item = Result<Value, FrontError>> + use<'a> {
        let walk = Walk {
            transport: self.transport,
            path: path.to_string(),
            params,
            options,
            style: None,
            fetched: 0,
            done: false,
        };
        stream::try_unfold(walk, Walk::next_page)
    }

    /// Every item of every page, read from `options.data_key`.
    pub fn items(
        &self,
        path: &str,
        params: Params,
        options: ItemOptions,
    ) -> impl Stream<Item = Result<Value, FrontError>> + use<'a> {
        let ItemOptions {
            max_items,
            data_key,
            pages,
        } = options;

        self.pages(path, params, pages)
            .map_ok(move |page| {
                stream::iter(take_items(page, &data_key).into_iter().map(Ok::<_, FrontError>))
            })
            .try_flatten()
            .take(max_items.unwrap_or(usize::MAX))
    }

    /// Calls `f` with each page until it breaks or the pages run out.
    ///
    /// Returns how many pages `f` saw.
    pub async fn each_page<F>(
        &self,
        path: &str,
        params: Params,
        options: PageOptions,
        mut f: F,
    ) -> Result<usize, FrontError>
    where
        F: FnMut(Value) -> ControlFlow<()>,
    {
        let pages = self.pages(path, params, options);
        pin_mut!(pages);
        drain(pages, &mut f).await
    }

    /// Calls `f` with each item until it breaks or the items run out.
    ///
    /// Returns how many items `f` saw.
    pub async fn each_item<F>(
        &self,
        path: &str,
        params: Params,
        options: ItemOptions,
        mut f: F,
    ) -> Result<usize, FrontError>
    where
        F: FnMut(Value) -> ControlFlow<()>,
    {
        let items = self.items(path, params, options);
        pin_mut!(items);
        drain(items, &mut f).await
    }
}

async fn drain<S, F>(mut stream: S, f: &mut F) -> Result<usize, FrontError>
where
    S: Stream<Item = Result<Value, FrontError>> + Unpin,
    F: FnMut(Value) -> ControlFlow<()>,
{
    let mut seen = 0;
    while let Some(value) = stream.try_next().await? {
        seen += 1;
        if f(value).is_break() {
            break;
        }
    }
    Ok(seen)
}

impl<'a> Walk<'a> {
    async fn next_page(mut self) -> Result<Option<(Value, Self)>, FrontError> {
        if self.done || self.options.max_pages.is_some_and(|max| self.fetched >= max) {
            return Ok(None);
        }
        if self.fetched > 0 {
            if let Some(interval) = self.options.sleep_interval {
                sleep(interval).await;
            }
        }

        self.fetched += 1;
        let url = self.transport.resolve_url(&self.path, &self.params)?;
        self.transport.config().instrument.emit(&Event::Page {
            page_number: self.fetched,
            url: url.to_string(),
        });
        debug!(page = self.fetched, style = ?self.style, path = %self.path, "walking to next page");

        let page = self.transport.get(&self.path, &self.params).await?;
        let style = *self
            .style
            .get_or_insert_with(|| PaginationStyle::detect(&page));

        let continuation = match style {
            PaginationStyle::Offset => offset_continuation(&page, &self.params, &self.options),
            PaginationStyle::Until => until_continuation(&page, &self.path, &self.params),
        };
        match continuation {
            Continuation::Offset { offset, limit } => {
                self.params.set("offset", offset).set("limit", limit);
            }
            Continuation::Until(cursor) => {
                self.params.set("until", cursor);
            }
            Continuation::Done => self.done = true,
        }

        Ok(Some((page, self)))
    }
}

fn offset_continuation(page: &Value, params: &Params, options: &PageOptions) -> Continuation {
    let requested = params
        .get("offset")
        .and_then(|offset| offset.parse().ok())
        .unwrap_or(0);
    let offset = page.get("offset").and_then(Value::as_u64).unwrap_or(requested);
    let limit = page
        .get("limit")
        .and_then(Value::as_u64)
        .filter(|limit| *limit > 0)
        .unwrap_or(DEFAULT_LIMIT);
    let count = find_items(page, &OFFSET_ITEM_KEYS).map_or(0, |(_, items)| items.len());

    if options.max_offset.is_some_and(|max| offset >= max) {
        return Continuation::Done;
    }
    if (count as u64) < limit {
        return Continuation::Done;
    }

    let mut next = offset.saturating_add(limit);
    if let Some(max) = options.max_offset {
        next = next.min(max);
    }
    Continuation::Offset {
        offset: next,
        limit,
    }
}

fn until_continuation(page: &Value, path: &str, params: &Params) -> Continuation {
    let Some((key, items)) = find_items(page, &UNTIL_ITEM_KEYS) else {
        return Continuation::Done;
    };
    if items.is_empty() {
        return Continuation::Done;
    }

    let fields = timestamp_fields(path, key);
    let explicit = page.pointer("/next/until").and_then(render);
    let derived = || items.last().and_then(|item| timestamp(item, fields));
    let Some(cursor) = explicit.or_else(derived) else {
        return Continuation::Done;
    };

    // Every item sits on the cursor: the next page would repeat this one.
    if items
        .iter()
        .all(|item| timestamp(item, fields).as_deref() == Some(cursor.as_str()))
    {
        return Continuation::Done;
    }

    let requested_limit = params.get("limit").and_then(|limit| limit.parse::<usize>().ok());
    if requested_limit.is_some_and(|limit| items.len() < limit) {
        return Continuation::Done;
    }
    if params.get("until") == Some(cursor.as_str()) {
        return Continuation::Done;
    }

    Continuation::Until(cursor)
}

/// The first of `keys` holding an array.
fn find_items<'p>(page: &'p Value, keys: &[&'static str]) -> Option<(&'static str, &'p Vec<Value>)> {
    let object: &Map<String, Value> = page.as_object()?;
    keys.iter()
        .find_map(|key| object.get(*key)?.as_array().map(|items| (*key, items)))
}

fn timestamp_fields(path: &str, key: &str) -> &'static [&'static str] {
    let is_message = |segment: &str| segment == "messages" || segment == "comments";
    if is_message(key) || path.split('/').any(is_message) {
        MESSAGE_TIMESTAMPS
    } else {
        TIMESTAMPS
    }
}

fn timestamp(item: &Value, fields: &[&str]) -> Option<String> {
    fields
        .iter()
        .find_map(|field| item.get(*field).and_then(render))
}

fn render(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn take_items(page: Value, data_key: &str) -> Vec<Value> {
    match page {
        Value::Object(mut object) => match object.remove(data_key) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}
