use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time;

use berkit::structures::Tag;

use crate::controls::{Control, IntoRawControlVec};
use crate::exop::Exop;
use crate::protocol::{LdapResultExt, MaybeControls};
use crate::result::{LdapError, LdapResult, Result};
use crate::search::{SearchItem, SearchOptions};
use crate::RequestId;

pub(crate) type ResultSender = oneshot::Sender<Result<(Tag, Vec<Control>)>>;
pub(crate) type ItemSender = mpsc::UnboundedSender<Result<(SearchItem, Vec<Control>)>>;

/// Submissions from operation handles to the connection driver.
pub(crate) enum ConnOp {
    Single {
        id: RequestId,
        tag: Tag,
        controls: MaybeControls,
        tx: ResultSender,
    },
    Search {
        id: RequestId,
        tag: Tag,
        controls: MaybeControls,
        tx: ItemSender,
    },
    Abandon {
        id: RequestId,
        target: RequestId,
        tag: Tag,
        controls: MaybeControls,
    },
    Unbind {
        id: RequestId,
        tag: Tag,
    },
    Close {
        immediate: bool,
        tx: oneshot::Sender<()>,
    },
}

/// Message ID source, shared by all handles of one connection.
///
/// IDs are assigned at submission, under the same lock that pushes the
/// operation onto the driver's channel, so submission order and ID order
/// always coincide.
pub(crate) struct MsgMap {
    next_id: RequestId,
}

impl MsgMap {
    pub(crate) fn new() -> MsgMap {
        MsgMap { next_id: 1 }
    }

    fn next_id(&mut self) -> RequestId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

/// Handle for LDAP operations.
///
/// A connection is opened with one of the [`LdapConnAsync`](struct.LdapConnAsync.html)
/// constructors, which also return the handle used for all subsequent
/// operations on that connection. The handle can be `clone()`d to multiplex
/// several logical conversations over the single connection.
///
/// All LDAP operations allow attaching a series of request controls, which
/// augment or modify the operation. Controls are attached by calling
/// [`with_controls()`](#method.with_controls) on the handle, and a
/// per-operation response deadline can be imposed by calling
/// [`with_timeout()`](#method.with_timeout). The Search operation has many
/// rarely used parameters, which can be set by passing a
/// [`SearchOptions`](struct.SearchOptions.html) structure to
/// [`with_search_options()`](#method.with_search_options). All modifiers
/// affect just the next operation invoked on the handle.
#[derive(Clone)]
pub struct Ldap {
    pub(crate) tx: mpsc::UnboundedSender<ConnOp>,
    pub(crate) msgmap: Arc<Mutex<MsgMap>>,
    /// Deadline for the next operation's terminating response.
    pub timeout: Option<Duration>,
    /// Request controls for the next operation.
    pub controls: MaybeControls,
    /// Options for the next Search operation.
    pub search_opts: Option<SearchOptions>,
    /// Message ID of the most recently submitted operation.
    pub last_id: RequestId,
}

impl Ldap {
    pub(crate) fn new(tx: mpsc::UnboundedSender<ConnOp>, msgmap: Arc<Mutex<MsgMap>>) -> Ldap {
        Ldap {
            tx,
            msgmap,
            timeout: None,
            controls: None,
            search_opts: None,
            last_id: 0,
        }
    }

    /// Use the provided `SearchOptions` with the next Search operation, which
    /// can be invoked directly on the result of this method. If this method
    /// is used in combination with a non-Search operation, the provided
    /// options will be silently discarded when the operation is invoked.
    pub fn with_search_options(&mut self, opts: SearchOptions) -> &mut Self {
        self.search_opts = Some(opts);
        self
    }

    /// Pass the provided request control(s) to the next LDAP operation.
    /// Controls can be constructed by instantiating structs in the
    /// [`controls`](controls/index.html) module, and converted to the form
    /// needed by this method by calling `into()` on the instances.
    pub fn with_controls<V: IntoRawControlVec>(&mut self, ctrls: V) -> &mut Self {
        self.controls = Some(ctrls.into());
        self
    }

    /// Perform the next operation with the timeout specified in `duration`.
    /// If the terminating response doesn't arrive in time, the operation is
    /// abandoned and reported as [`LdapError::Timeout`]; the connection
    /// remains usable for subsequent operations.
    pub fn with_timeout(&mut self, duration: Duration) -> &mut Self {
        self.timeout = Some(duration);
        self
    }

    /// Assign the next message ID and hand the operation to the driver.
    ///
    /// The msgmap lock is held across the channel send; two racing handles
    /// can't reorder their submissions between ID assignment and delivery.
    pub(crate) fn send_op<F>(&mut self, build: F) -> Result<RequestId>
    where
        F: FnOnce(RequestId, MaybeControls) -> ConnOp,
    {
        let controls = self.controls.take();
        let mut msgmap = self.msgmap.lock().expect("msgmap mutex");
        let id = msgmap.next_id();
        self.tx
            .send(build(id, controls))
            .map_err(|_| LdapError::ConnectionClosed)?;
        drop(msgmap);
        self.last_id = id;
        Ok(id)
    }

    pub(crate) fn search_call(&mut self, req: Tag, tx: ItemSender) -> Result<RequestId> {
        self.search_opts = None;
        self.send_op(|id, controls| ConnOp::Search {
            id,
            tag: req,
            controls,
            tx,
        })
    }

    /// Submit a single-response operation and await its terminating
    /// response. Result codes 0 (success), 5 (compareFalse) and
    /// 6 (compareTrue) resolve the operation successfully; everything else
    /// becomes `OperationFailed` carrying the full result.
    pub(crate) async fn op_call(&mut self, req: Tag) -> Result<(LdapResult, Exop)> {
        self.search_opts = None;
        let (tx, rx) = oneshot::channel();
        let id = self.send_op(|id, controls| ConnOp::Single {
            id,
            tag: req,
            controls,
            tx,
        })?;
        let response = match self.timeout.take() {
            Some(timeout) => match time::timeout(timeout, rx).await {
                Ok(response) => response,
                Err(_) => {
                    let _ = self.abandon(id).await;
                    return Err(LdapError::Timeout);
                }
            },
            None => rx.await,
        };
        let (tag, ctrls) = response.map_err(|_| LdapError::ConnectionClosed)??;
        let LdapResultExt(mut result, exop) = LdapResultExt::from(tag);
        result.ctrls = ctrls;
        match result.rc {
            0 | 5 | 6 => Ok((result, exop)),
            _ => Err(LdapError::OperationFailed { result }),
        }
    }

    /// Shut the connection down.
    ///
    /// With `immediate` set, the socket is destroyed at once and every
    /// pending operation resolves with `ConnectionClosed`. Otherwise no
    /// further submissions are accepted, in-flight operations are allowed
    /// to complete, and the socket is destroyed once the connection has
    /// fully drained; this method returns at that point.
    pub async fn close(&mut self, immediate: bool) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(ConnOp::Close { immediate, tx }).is_err() {
            // driver already gone, nothing left to close
            return Ok(());
        }
        let _ = rx.await;
        Ok(())
    }
}
