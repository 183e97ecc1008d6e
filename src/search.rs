use std::collections::HashMap;

use berkit::common::TagClass;
use berkit::structure::StructureTag;
use berkit::structures::{Boolean, Enumerated, Integer, OctetString, Sequence, Tag};

use tokio::sync::mpsc;
use tokio::time;

use crate::controls::Control;
use crate::filter::Filter;
use crate::ldap::Ldap;
use crate::protocol::LdapResultExt;
use crate::result::{LdapError, LdapResult, Result, SearchResult};
use crate::RequestId;

/// Scope of the search.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Scope {
    /// Base object; search only the object named in the base.
    Base = 0,
    /// Search the objects immediately below the base.
    OneLevel = 1,
    /// Search the object named in the base and the whole subtree below it.
    Subtree = 2,
}

/// Possible values for alias dereferencing during search.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DerefAliases {
    /// Never dereference.
    Never = 0,
    /// Dereference while searching.
    InSearch = 1,
    /// Dereference in finding the base object.
    FindingBaseObject = 2,
    /// Always dereference.
    Always = 3,
}

/// Additional parameters for the Search operation.
#[derive(Clone, Debug)]
pub struct SearchOptions {
    pub(crate) deref: DerefAliases,
    pub(crate) typesonly: bool,
    pub(crate) sizelimit: i32,
    pub(crate) timelimit: i32,
}

impl SearchOptions {
    /// Create an instance of the structure with default values.
    pub fn new() -> Self {
        SearchOptions {
            deref: DerefAliases::Never,
            typesonly: false,
            sizelimit: 0,
            timelimit: 0,
        }
    }

    /// Set the method for dereferencing aliases.
    pub fn deref(mut self, d: DerefAliases) -> Self {
        self.deref = d;
        self
    }

    /// Set the indicator of returning just attribute names (`true`) vs. names
    /// and values (`false`).
    pub fn typesonly(mut self, typesonly: bool) -> Self {
        self.typesonly = typesonly;
        self
    }

    /// Set the size limit, in entries, for the whole search.
    pub fn sizelimit(mut self, sizelimit: i32) -> Self {
        self.sizelimit = sizelimit;
        self
    }

    /// Set the time limit, in seconds, for the whole search.
    pub fn timelimit(mut self, timelimit: i32) -> Self {
        self.timelimit = timelimit;
        self
    }
}

impl Default for SearchOptions {
    fn default() -> Self {
        SearchOptions::new()
    }
}

/// One item delivered by the server for an active search.
pub(crate) enum SearchItem {
    Entry(StructureTag),
    Referral(StructureTag),
    Intermediate(StructureTag),
    Done(Tag),
}

/// Wrapper for a search result item, carrying the response controls
/// received with it.
///
/// The raw result can be a directory entry, a referral, or an intermediate
/// message, discriminated with [`is_ref()`](#method.is_ref) and
/// [`is_intermediate()`](#method.is_intermediate). An entry is turned into
/// an attribute map with [`SearchEntry::construct()`](struct.SearchEntry.html#method.construct).
#[derive(Clone, Debug)]
pub struct ResultEntry(pub StructureTag, pub Vec<Control>);

impl ResultEntry {
    pub fn is_ref(&self) -> bool {
        self.0.id == 19
    }

    pub fn is_intermediate(&self) -> bool {
        self.0.id == 25
    }
}

/// Parsed search result entry.
#[derive(Clone, Debug, PartialEq)]
pub struct SearchEntry {
    /// Entry DN.
    pub dn: String,
    /// Attributes.
    pub attrs: HashMap<String, Vec<String>>,
    /// Binary-valued attributes.
    pub bin_attrs: HashMap<String, Vec<Vec<u8>>>,
}

impl SearchEntry {
    /// Parse raw BER data and convert it into attribute map(s).
    ///
    /// Values which can't be converted into UTF-8 strings are put into the
    /// `bin_attrs` map, together with the rest of that attribute's values.
    pub fn construct(re: ResultEntry) -> SearchEntry {
        let mut tags = re
            .0
            .expect_constructed()
            .expect("entry components")
            .into_iter();
        let dn = String::from_utf8(
            tags.next()
                .expect("element")
                .expect_primitive()
                .expect("octet string"),
        )
        .expect("object name");
        let mut attrs = HashMap::new();
        let mut bin_attrs = HashMap::new();
        let attr_list = tags
            .next()
            .expect("element")
            .expect_constructed()
            .unwrap_or_default();
        for attr_pair in attr_list {
            let mut part = attr_pair
                .expect_constructed()
                .expect("partial attribute")
                .into_iter();
            let name = String::from_utf8(
                part.next()
                    .expect("element")
                    .expect_primitive()
                    .expect("octet string"),
            )
            .expect("attribute name");
            let values: Vec<Vec<u8>> = part
                .next()
                .expect("element")
                .expect_constructed()
                .expect("value set")
                .into_iter()
                .map(|v| v.expect_primitive().expect("octet string"))
                .collect();
            if values.iter().all(|v| std::str::from_utf8(v).is_ok()) {
                attrs.insert(
                    name,
                    values
                        .into_iter()
                        .map(|v| String::from_utf8(v).expect("checked utf-8"))
                        .collect(),
                );
            } else {
                bin_attrs.insert(name, values);
            }
        }
        SearchEntry {
            dn,
            attrs,
            bin_attrs,
        }
    }
}

/// Extract referral URIs from a referral or result component.
pub fn parse_refs(t: StructureTag) -> Vec<String> {
    t.expect_constructed()
        .expect("referrals")
        .into_iter()
        .map(|t| t.expect_primitive().expect("octet string"))
        .map(|v| String::from_utf8(v).expect("referral uri"))
        .collect()
}

/// Handle for obtaining a stream of search results.
///
/// A streaming search returns this handle immediately; entries arrive as
/// the server produces them, and are retrieved by repeatedly calling
/// [`next()`](#method.next) until it returns `Ok(None)` or an error. The
/// overall result of the search is then available from
/// [`finish()`](#method.finish). The stream can be restarted only by
/// issuing a new search; cancelling it mid-flight is done with
/// [`abandon()`](#method.abandon).
pub struct SearchStream {
    id: RequestId,
    ldap: Ldap,
    rx: Option<mpsc::UnboundedReceiver<Result<(SearchItem, Vec<Control>)>>>,
    res: Option<LdapResult>,
}

impl SearchStream {
    pub(crate) fn new(
        id: RequestId,
        ldap: Ldap,
        rx: mpsc::UnboundedReceiver<Result<(SearchItem, Vec<Control>)>>,
    ) -> SearchStream {
        SearchStream {
            id,
            ldap,
            rx: Some(rx),
            res: None,
        }
    }

    /// Fetch the next item from the stream. `Ok(None)` signals the end of
    /// the stream; the terminating result is then available from
    /// [`finish()`](#method.finish).
    pub async fn next(&mut self) -> Result<Option<ResultEntry>> {
        let rx = match self.rx.as_mut() {
            Some(rx) => rx,
            None => return Ok(None),
        };
        let item = match self.ldap.timeout {
            Some(timeout) => match time::timeout(timeout, rx.recv()).await {
                Ok(item) => item,
                Err(_) => {
                    self.rx = None;
                    let mut ldap = self.ldap.clone();
                    let _ = ldap.abandon(self.id).await;
                    return Err(LdapError::Timeout);
                }
            },
            None => rx.recv().await,
        };
        match item {
            None => {
                self.rx = None;
                Err(LdapError::EndOfStream)
            }
            Some(Err(e)) => {
                self.rx = None;
                Err(e)
            }
            Some(Ok((SearchItem::Done(tag), ctrls))) => {
                let LdapResultExt(mut result, _) = LdapResultExt::from(tag);
                result.ctrls = ctrls;
                self.res = Some(result);
                self.rx = None;
                Ok(None)
            }
            Some(Ok((SearchItem::Entry(st), ctrls)))
            | Some(Ok((SearchItem::Referral(st), ctrls)))
            | Some(Ok((SearchItem::Intermediate(st), ctrls))) => Ok(Some(ResultEntry(st, ctrls))),
        }
    }

    /// Return the overall result of the search. Must be called after the
    /// stream has terminated; an unterminated or abandoned search reports
    /// result code 88 (abandoned).
    pub fn finish(&mut self) -> LdapResult {
        self.res.take().unwrap_or_else(|| LdapResult {
            rc: 88,
            matched: String::from(""),
            text: String::from("stream terminated without a result"),
            refs: vec![],
            ctrls: vec![],
        })
    }

    /// Cancel the search by sending an Abandon operation for its message ID.
    /// The stream's pending state resolves with `LdapError::Abandoned`.
    pub async fn abandon(&mut self) -> Result<()> {
        let mut ldap = self.ldap.clone();
        ldap.abandon(self.id).await
    }

    /// Message ID of the search operation driving this stream.
    pub fn last_id(&self) -> RequestId {
        self.id
    }
}

impl Ldap {
    /// Perform a Search with the given base DN (`base`), scope, filter, and
    /// the list of attributes to be returned (`attrs`). If `attrs` is empty,
    /// or if it contains a special name `*` (asterisk), return all (user)
    /// attributes. Requesting a special name `+` (plus sign) will return all
    /// operational attributes. Include both `*` and `+` in order to return
    /// all attributes of an entry.
    ///
    /// The returned structure wraps the vector of result entries and the
    /// overall result of the operation.
    ///
    /// This method should be used if it's known that the result set won't be
    /// large. For other situations, one can use
    /// [`streaming_search()`](#method.streaming_search).
    pub async fn search<S: AsRef<str>>(
        &mut self,
        base: &str,
        scope: Scope,
        filter: Filter,
        attrs: Vec<S>,
    ) -> Result<SearchResult> {
        let mut stream = self.streaming_search(base, scope, filter, attrs).await?;
        let mut re_vec = vec![];
        while let Some(entry) = stream.next().await? {
            if entry.is_intermediate() {
                continue;
            }
            re_vec.push(entry);
        }
        Ok(SearchResult(re_vec, stream.finish()))
    }

    /// Perform a Search, but unlike [`search()`](#method.search) (q.v., also
    /// for the parameters), which returns all results at once, return a
    /// stream handle which is used for retrieving entries one by one.
    pub async fn streaming_search<S: AsRef<str>>(
        &mut self,
        base: &str,
        scope: Scope,
        filter: Filter,
        attrs: Vec<S>,
    ) -> Result<SearchStream> {
        let opts = self.search_opts.take().unwrap_or_default();
        let req = Tag::Sequence(Sequence {
            id: 3,
            class: TagClass::Application,
            inner: vec![
                Tag::OctetString(OctetString {
                    inner: Vec::from(base.as_bytes()),
                    ..Default::default()
                }),
                Tag::Enumerated(Enumerated {
                    inner: scope as i64,
                    ..Default::default()
                }),
                Tag::Enumerated(Enumerated {
                    inner: opts.deref as i64,
                    ..Default::default()
                }),
                Tag::Integer(Integer {
                    inner: i64::from(opts.sizelimit),
                    ..Default::default()
                }),
                Tag::Integer(Integer {
                    inner: i64::from(opts.timelimit),
                    ..Default::default()
                }),
                Tag::Boolean(Boolean {
                    inner: opts.typesonly,
                    ..Default::default()
                }),
                filter.into_tag()?,
                Tag::Sequence(Sequence {
                    inner: attrs
                        .into_iter()
                        .map(|s| {
                            Tag::OctetString(OctetString {
                                inner: Vec::from(s.as_ref().as_bytes()),
                                ..Default::default()
                            })
                        })
                        .collect(),
                    ..Default::default()
                }),
            ],
        });
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.search_call(req, tx)?;
        // the per-reply timeout travels with the stream handle
        let ldap = self.clone();
        self.timeout = None;
        Ok(SearchStream::new(id, ldap, rx))
    }
}
