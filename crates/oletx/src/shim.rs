//! Coordinator proxy client interface
//!
//! These traits are the only view the bridge has of the coordinator's
//! proxy service. An adapter implements them over whatever IPC the local
//! coordinator exposes and keeps all marshaling and reference counting
//! behind them; the bridge itself only sees byte sequences and boxed shims.

use std::fmt;

use uuid::Uuid;

use crate::error::Result;
use crate::handle_table::Handle;

/// Buffer returned by the proxy
///
/// The release action runs exactly once, when the buffer is dropped.
pub struct ShimBuffer {
    data: Vec<u8>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl ShimBuffer {
    /// Wrap bytes that need no release
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            release: None,
        }
    }

    /// Wrap bytes whose owner must be notified on release
    pub fn with_release<F>(data: impl Into<Vec<u8>>, release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            data: data.into(),
            release: Some(Box::new(release)),
        }
    }

    /// Borrow the buffer contents
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Buffer length
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Drop for ShimBuffer {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for ShimBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShimBuffer")
            .field("len", &self.data.len())
            .field("owned_by_proxy", &self.release.is_some())
            .finish()
    }
}

/// Transaction isolation level reported by the coordinator
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IsolationLevel {
    Unspecified,
    Chaos,
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
    Other(i32),
}

impl IsolationLevel {
    /// Decode the coordinator's numeric isolation level
    pub fn from_raw(value: i32) -> Self {
        match value {
            -1 => Self::Unspecified,
            0x10 => Self::Chaos,
            0x100 => Self::ReadUncommitted,
            0x1000 => Self::ReadCommitted,
            0x10000 => Self::RepeatableRead,
            0x100000 => Self::Serializable,
            other => Self::Other(other),
        }
    }

    /// Numeric value used by the coordinator
    pub fn to_raw(self) -> i32 {
        match self {
            Self::Unspecified => -1,
            Self::Chaos => 0x10,
            Self::ReadUncommitted => 0x100,
            Self::ReadCommitted => 0x1000,
            Self::RepeatableRead => 0x10000,
            Self::Serializable => 0x100000,
            Self::Other(value) => value,
        }
    }
}

/// Final outcome of a transaction as seen by an outcome enlistment
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TransactionOutcome {
    #[default]
    NotKnownYet,
    Committed,
    Aborted,
}

/// Kind of asynchronous notification raised by the proxy
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotificationKind {
    None,
    Phase0Request,
    VoteRequest,
    PrepareRequest,
    CommitRequest,
    AbortRequest,
    Committed,
    Aborted,
    InDoubt,
    EnlistmentTmDown,
    ResourceManagerTmDown,
    Unknown(i32),
}

impl NotificationKind {
    /// Decode the proxy's numeric notification type
    pub fn from_raw(value: i32) -> Self {
        match value {
            0 => Self::None,
            1 => Self::Phase0Request,
            2 => Self::VoteRequest,
            3 => Self::PrepareRequest,
            4 => Self::CommitRequest,
            5 => Self::AbortRequest,
            6 => Self::Committed,
            7 => Self::Aborted,
            8 => Self::InDoubt,
            9 => Self::EnlistmentTmDown,
            10 => Self::ResourceManagerTmDown,
            other => Self::Unknown(other),
        }
    }

    /// Numeric value used by the proxy
    pub fn to_raw(self) -> i32 {
        match self {
            Self::None => 0,
            Self::Phase0Request => 1,
            Self::VoteRequest => 2,
            Self::PrepareRequest => 3,
            Self::CommitRequest => 4,
            Self::AbortRequest => 5,
            Self::Committed => 6,
            Self::Aborted => 7,
            Self::InDoubt => 8,
            Self::EnlistmentTmDown => 9,
            Self::ResourceManagerTmDown => 10,
            Self::Unknown(value) => value,
        }
    }
}

/// Notification addressed to a handle handed out by this process
#[derive(Debug)]
pub struct ShimNotification {
    /// Handle the notification is addressed to
    pub handle: Handle,
    /// Notification kind
    pub kind: NotificationKind,
    pub is_single_phase: bool,
    pub aborting_hint: bool,
    /// Whether the proxy's notification lock must be released afterwards
    pub release_required: bool,
    pub prepare_info: Option<ShimBuffer>,
}

/// Transaction properties reported by a native transaction
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct XactTransInfo {
    /// Unit-of-work identifier
    pub uow: Uuid,
    pub iso_level: i32,
    pub iso_flags: u32,
    pub grf_tc_supported: u32,
    pub grf_rm_supported: u32,
    pub grf_tc_supported_retaining: u32,
    pub grf_rm_supported_retaining: u32,
}

/// Native transaction object for legacy in-process consumers
pub trait NativeTransaction: Send + Sync {
    /// Commit the transaction
    fn commit(&self, retaining: bool, grf_tc: u32, grf_rm: u32) -> Result<()>;

    /// Abort the transaction
    fn abort(&self, reason: Option<Uuid>, retaining: bool, asynchronous: bool) -> Result<()>;

    /// Query the transaction's properties
    fn transaction_info(&self) -> Result<XactTransInfo>;
}

/// Live proxy handle to a promoted transaction
pub trait TransactionShim: Send {
    /// Commit the transaction
    fn commit(&self) -> Result<()>;

    /// Abort the transaction
    fn abort(&self) -> Result<()>;

    /// Push-propagate toward the coordinator at `whereabouts`, yielding a cookie
    fn export(&self, whereabouts: &[u8]) -> Result<ShimBuffer>;

    /// Native transaction representation of this shim
    fn native_transaction(&self) -> Result<Box<dyn NativeTransaction>>;

    /// Propagation token for this transaction
    fn propagation_token(&self) -> Result<ShimBuffer>;
}

/// Proxy-side registration of this process's resource manager
pub trait ResourceManagerShim: Send + Sync {}

/// Result of a successful proxy connect
pub struct ProxyConnection {
    /// Whether the proxy accepted the node name
    pub node_name_matches: bool,
    /// Location of the local coordinator, if reported
    pub whereabouts: Option<ShimBuffer>,
    /// Resource manager registration, if created
    pub resource_manager: Option<Box<dyn ResourceManagerShim>>,
}

/// Result of a pull propagation
pub struct ReceivedTransaction {
    pub transaction_id: Uuid,
    pub isolation_level: IsolationLevel,
    /// Transaction shim, absent when the proxy could not import the token
    pub shim: Option<Box<dyn TransactionShim>>,
}

/// Factory interface of the coordinator proxy
pub trait ProxyShimFactory: Send + Sync {
    /// Connect to the proxy and register a resource manager
    fn connect_to_proxy(
        &self,
        node_name: &str,
        resource_manager_id: Uuid,
        managed_id: Handle,
    ) -> Result<ProxyConnection>;

    /// Pull-propagate a transaction from its propagation token
    fn receive_transaction(&self, token: &[u8], managed_id: Handle) -> Result<ReceivedTransaction>;

    /// Next pending notification, if any
    fn get_notification(&self) -> Result<Option<ShimNotification>>;

    /// Release the notification lock taken by a notification
    fn release_notification_lock(&self) -> Result<()>;
}
