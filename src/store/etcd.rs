//! etcd-backed store.

use async_trait::async_trait;
use etcd_client::Client;
use etcd_client::Compare;
use etcd_client::CompareOp;
use etcd_client::KeyValue;
use etcd_client::Txn;
use etcd_client::TxnOp;
use etcd_client::TxnOpResponse;

use super::CasOutcome;
use super::LockStore;
use super::StoreError;
use super::Witness;

/// Production [`LockStore`] over an etcd cluster.
///
/// Each conditional write is a single etcd transaction. A
/// [`Witness::Present`] witness compares the stored value byte-for-byte;
/// [`Witness::Absent`] compares the key's create revision against zero,
/// etcd's create-only-if-absent primitive. When the caller asks to fetch on
/// conflict, the transaction's failure branch reads the key in the same
/// round trip.
#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
}

impl EtcdStore {
    /// Wrap an already connected client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect to the cluster at `endpoints`.
    pub async fn connect<E: AsRef<str>, S: AsRef<[E]>>(endpoints: S) -> Result<Self, StoreError> {
        let client = Client::connect(endpoints, None)
            .await
            .map_err(|err| classify("connect", err))?;
        Ok(Self::new(client))
    }

    async fn transact(
        &self,
        key: &str,
        witness: &Witness,
        success: TxnOp,
        fetch_on_conflict: bool,
    ) -> Result<CasOutcome, StoreError> {
        let compare = match witness {
            Witness::Absent => Compare::create_revision(key, CompareOp::Equal, 0),
            Witness::Present(expected) => Compare::value(key, CompareOp::Equal, expected.as_str()),
        };
        let mut txn = Txn::new().when([compare]).and_then([success]);
        if fetch_on_conflict {
            txn = txn.or_else([TxnOp::get(key, None)]);
        }

        let response = self
            .client
            .kv_client()
            .txn(txn)
            .await
            .map_err(|err| classify("txn", err))?;
        if response.succeeded() {
            return Ok(CasOutcome::Committed);
        }

        let mut current = None;
        for op in response.op_responses() {
            if let TxnOpResponse::Get(get) = op {
                current = Some(observe(get.kvs())?);
            }
        }
        Ok(CasOutcome::Conflict { current })
    }
}

#[async_trait]
impl LockStore for EtcdStore {
    async fn get(&self, key: &str) -> Result<Witness, StoreError> {
        let response = self
            .client
            .kv_client()
            .get(key, None)
            .await
            .map_err(|err| classify("get", err))?;
        observe(response.kvs())
    }

    async fn put_if(
        &self,
        key: &str,
        value: &str,
        witness: &Witness,
        fetch_on_conflict: bool,
    ) -> Result<CasOutcome, StoreError> {
        self.transact(key, witness, TxnOp::put(key, value, None), fetch_on_conflict)
            .await
    }

    async fn delete_if(
        &self,
        key: &str,
        witness: &Witness,
        fetch_on_conflict: bool,
    ) -> Result<CasOutcome, StoreError> {
        self.transact(key, witness, TxnOp::delete(key, None), fetch_on_conflict)
            .await
    }
}

fn observe(kvs: &[KeyValue]) -> Result<Witness, StoreError> {
    match kvs.first() {
        Some(kv) => {
            let value = kv.value_str().map_err(|err| StoreError::Request {
                message: format!("non-utf8 value: {err}"),
            })?;
            Ok(Witness::Present(value.to_string()))
        }
        None => Ok(Witness::Absent),
    }
}

/// Status codes worth retrying: the server may come back, the deadline may
/// be met next time, and unknown server-side failures are treated the same
/// way.
fn retryable_code(code: tonic::Code) -> bool {
    matches!(
        code,
        tonic::Code::Unavailable | tonic::Code::DeadlineExceeded | tonic::Code::Unknown
    )
}

/// Partition client failures into retryable transport trouble and
/// everything else.
fn classify(operation: &str, err: etcd_client::Error) -> StoreError {
    let retryable = match &err {
        etcd_client::Error::GRpcStatus(status) => retryable_code(status.code()),
        etcd_client::Error::TransportError(_) | etcd_client::Error::IoError(_) => true,
        _ => false,
    };
    if retryable {
        StoreError::Unavailable {
            message: format!("{operation}: {err}"),
        }
    } else {
        StoreError::Request {
            message: format!("{operation}: {err}"),
        }
    }
}
