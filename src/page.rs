//! Page and slice envelopes and the controller reading them.
//!
//! A page issues a count query next to the content query and knows its total.
//! A slice reads one row more than it returns and only knows whether another
//! slice follows.

use serde::Serialize;
use serde::ser::{SerializeStruct, Serializer};

use crate::compile::CompiledQuery;
use crate::error::{DerivaError, Result};
use crate::execute::{Args, Engine};
use crate::projection::Projected;
use crate::query::Sort;
use crate::storage::Directives;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    page: usize,
    size: usize,
    sort: Sort,
}

impl PageRequest {
    /// Zero based page index and page size.
    pub fn of(page: usize, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(DerivaError::definition(
                "page request",
                "page size must be greater than zero",
            ));
        }
        Ok(Self {
            page,
            size,
            sort: Sort::unsorted(),
        })
    }
    pub fn sorted(mut self, sort: Sort) -> Self {
        self.sort = sort;
        self
    }
    pub fn page(&self) -> usize {
        self.page
    }
    pub fn size(&self) -> usize {
        self.size
    }
    pub fn sort(&self) -> &Sort {
        &self.sort
    }
    /// Rows skipped before this page. Fails when the index is too large to
    /// address.
    pub fn offset(&self) -> Result<usize> {
        self.page.checked_mul(self.size).ok_or_else(|| {
            DerivaError::Parameter(format!(
                "page {} of size {} is beyond any addressable row",
                self.page, self.size
            ))
        })
    }
    pub fn next(&self) -> Self {
        Self {
            page: self.page.saturating_add(1),
            ..self.clone()
        }
    }
    pub fn previous(&self) -> Option<Self> {
        self.page.checked_sub(1).map(|page| Self {
            page,
            ..self.clone()
        })
    }
    /// Caps the size at `max`.
    pub fn clamped(mut self, max: usize) -> Self {
        self.size = self.size.min(max);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    content: Vec<T>,
    request: PageRequest,
    total_elements: u64,
}

impl<T> Page<T> {
    pub fn new(content: Vec<T>, request: PageRequest, total_elements: u64) -> Self {
        Self {
            content,
            request,
            total_elements,
        }
    }
    pub fn content(&self) -> &[T] {
        &self.content
    }
    pub fn into_content(self) -> Vec<T> {
        self.content
    }
    pub fn number(&self) -> usize {
        self.request.page
    }
    pub fn size(&self) -> usize {
        self.request.size
    }
    pub fn sort(&self) -> &Sort {
        &self.request.sort
    }
    pub fn number_of_elements(&self) -> usize {
        self.content.len()
    }
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
    pub fn total_elements(&self) -> u64 {
        self.total_elements
    }
    pub fn total_pages(&self) -> u64 {
        self.total_elements.div_ceil(self.request.size as u64)
    }
    pub fn is_first(&self) -> bool {
        self.request.page == 0
    }
    /// True when no page follows. Unlike `number() == total_pages() - 1`
    /// this also holds for an index past the end, and for an empty result.
    pub fn is_last(&self) -> bool {
        !self.has_next()
    }
    pub fn has_next(&self) -> bool {
        (self.request.page as u64) < self.total_pages().saturating_sub(1)
    }
    pub fn has_previous(&self) -> bool {
        self.request.page > 0
    }
    pub fn next_request(&self) -> Option<PageRequest> {
        self.has_next().then(|| self.request.next())
    }
    pub fn previous_request(&self) -> Option<PageRequest> {
        self.request.previous()
    }
    pub fn map<U, F>(self, f: F) -> Page<U>
    where
        F: FnMut(T) -> U,
    {
        Page {
            content: self.content.into_iter().map(f).collect(),
            request: self.request,
            total_elements: self.total_elements,
        }
    }
    pub fn try_map<U, F>(self, f: F) -> Result<Page<U>>
    where
        F: FnMut(T) -> Result<U>,
    {
        Ok(Page {
            content: self.content.into_iter().map(f).collect::<Result<Vec<U>>>()?,
            request: self.request,
            total_elements: self.total_elements,
        })
    }
}

impl<T: Serialize> Serialize for Page<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut page = serializer.serialize_struct("Page", 8)?;
        page.serialize_field("content", &self.content)?;
        page.serialize_field("number", &self.number())?;
        page.serialize_field("size", &self.size())?;
        page.serialize_field("totalElements", &self.total_elements)?;
        page.serialize_field("totalPages", &self.total_pages())?;
        page.serialize_field("first", &self.is_first())?;
        page.serialize_field("last", &self.is_last())?;
        page.serialize_field("hasNext", &self.has_next())?;
        page.end()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Slice<T> {
    content: Vec<T>,
    request: PageRequest,
    has_next: bool,
}

impl<T> Slice<T> {
    pub fn new(content: Vec<T>, request: PageRequest, has_next: bool) -> Self {
        Self {
            content,
            request,
            has_next,
        }
    }
    pub fn content(&self) -> &[T] {
        &self.content
    }
    pub fn into_content(self) -> Vec<T> {
        self.content
    }
    pub fn number(&self) -> usize {
        self.request.page
    }
    pub fn size(&self) -> usize {
        self.request.size
    }
    pub fn sort(&self) -> &Sort {
        &self.request.sort
    }
    pub fn number_of_elements(&self) -> usize {
        self.content.len()
    }
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
    pub fn is_first(&self) -> bool {
        self.request.page == 0
    }
    pub fn is_last(&self) -> bool {
        !self.has_next
    }
    pub fn has_next(&self) -> bool {
        self.has_next
    }
    pub fn has_previous(&self) -> bool {
        self.request.page > 0
    }
    pub fn next_request(&self) -> Option<PageRequest> {
        self.has_next.then(|| self.request.next())
    }
    pub fn previous_request(&self) -> Option<PageRequest> {
        self.request.previous()
    }
    pub fn map<U, F>(self, f: F) -> Slice<U>
    where
        F: FnMut(T) -> U,
    {
        Slice {
            content: self.content.into_iter().map(f).collect(),
            request: self.request,
            has_next: self.has_next,
        }
    }
    pub fn try_map<U, F>(self, f: F) -> Result<Slice<U>>
    where
        F: FnMut(T) -> Result<U>,
    {
        Ok(Slice {
            content: self.content.into_iter().map(f).collect::<Result<Vec<U>>>()?,
            request: self.request,
            has_next: self.has_next,
        })
    }
}

impl<T: Serialize> Serialize for Slice<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut slice = serializer.serialize_struct("Slice", 6)?;
        slice.serialize_field("content", &self.content)?;
        slice.serialize_field("number", &self.number())?;
        slice.serialize_field("size", &self.size())?;
        slice.serialize_field("first", &self.is_first())?;
        slice.serialize_field("last", &self.is_last())?;
        slice.serialize_field("hasNext", &self.has_next)?;
        slice.end()
    }
}

// ------------- Controller -------------
/// Reads a page: the content window plus a count over the same predicate.
pub fn read_page(
    engine: &Engine,
    definition: &str,
    compiled: &CompiledQuery,
    args: &Args,
    request: PageRequest,
    directives: Directives,
) -> Result<Page<Projected>> {
    let count = compiled.count.as_ref().ok_or_else(|| {
        DerivaError::definition(definition, "paged query has no count query")
    })?;
    let window = compiled.content.window(Some(request.size()), request.offset()?)?;
    let rows = engine.fetch(definition, &window, &compiled.plan, args, directives)?;
    let total = engine.count(definition, count, args, Directives::default())?;
    Ok(Page::new(rows, request, total))
}

/// Reads a slice by over-fetching a single row. Never counts.
pub fn read_slice(
    engine: &Engine,
    definition: &str,
    compiled: &CompiledQuery,
    args: &Args,
    request: PageRequest,
    directives: Directives,
) -> Result<Slice<Projected>> {
    let window = compiled.content.window(Some(request.size().saturating_add(1)), request.offset()?)?;
    let mut rows = engine.rows(definition, &window, args, directives)?;
    let has_next = rows.len() > request.size();
    rows.truncate(request.size());
    let content = engine.map(&compiled.plan, rows, directives)?;
    Ok(Slice::new(content, request, has_next))
}
