use braid_core::types::{Address, BallId, Mci, UnitId};
use braid_dag::{Ball, Unit};
use braid_sync::{CatchupRequest, CatchupResponse, HashTreeEntry};
use serde::{Deserialize, Serialize};

/// Sort order requested for a light AA-response query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryOrder {
    Ascending,
    Descending,
}

/// A light-client history request, scoped to either a set of addresses or a
/// specific set of joints the client already has partial knowledge of.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LightHistoryRequest {
    pub addresses: Option<Vec<Address>>,
    pub requested_joints: Option<Vec<UnitId>>,
    pub witnesses: Vec<Address>,
    pub min_mci: Option<Mci>,
    pub known_stable_units: Option<Vec<UnitId>>,
}

/// A light-client AA-response request, paginated by `(mci, aa_response_id)`
/// so results spanning more than 100 responses at the same MCI stay ordered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LightAaResponsesRequest {
    pub aas: Vec<Address>,
    pub min_mci: Option<Mci>,
    pub max_mci: Option<Mci>,
    pub order: HistoryOrder,
    pub last_aa_response_id: Option<String>,
}

/// Messages exchanged with peers (§6.2 peer message contract).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum P2pMessage {
    /// A lagging node's catchup request.
    CatchupRequest { last_stable_mci: Mci, last_known_mci: Mci, witnesses: Vec<Address> },
    /// Response to `CatchupRequest`: witness proof, stable cursor, ball chain.
    CatchupChain {
        witness_proof_joints: Vec<Unit>,
        stable_last_ball_unit: Option<UnitId>,
        ball_chain: Vec<Ball>,
    },
    /// Request a hash-tree batch covering `from_mci..=to_mci`.
    GetHashTree { from_mci: Mci, to_mci: Mci },
    /// Response: a batch of unit/ball-id/ball triples for the hash-tree
    /// protocol. `BallId` travels alongside `Ball` so the receiver checks
    /// the claimed hash against the ball's own fields instead of trusting
    /// them unconditionally.
    HashTreeBatch { entries: Vec<(UnitId, BallId, Ball)> },
    /// Unsolicited push of a newly-authored unit.
    NewJoint { unit: Unit },
    /// Light-client history request.
    LightGetHistory(LightHistoryRequest),
    /// Response to `LightGetHistory`, or an error if the scope was too large.
    HistoryPayload { joints: Vec<Unit> },
    /// Light-client AA-response request.
    LightGetAaResponses(LightAaResponsesRequest),
    /// Response to `LightGetAaResponses`: at most 100 responses.
    AaResponses { responses: Vec<serde_json::Value> },
    /// A taxonomized error, returned instead of echoing peer-supplied data.
    Error { code: String, message: String },
}

impl From<CatchupRequest> for P2pMessage {
    fn from(req: CatchupRequest) -> Self {
        P2pMessage::CatchupRequest { last_stable_mci: req.last_stable_mci, last_known_mci: req.last_stable_mci, witnesses: req.witnesses }
    }
}

impl From<CatchupResponse> for P2pMessage {
    fn from(resp: CatchupResponse) -> Self {
        P2pMessage::CatchupChain {
            witness_proof_joints: resp.witness_proof_joints,
            stable_last_ball_unit: resp.stable_last_ball_unit,
            ball_chain: resp.ball_chain,
        }
    }
}

impl From<Vec<HashTreeEntry>> for P2pMessage {
    fn from(entries: Vec<HashTreeEntry>) -> Self {
        P2pMessage::HashTreeBatch { entries: entries.into_iter().map(|e| (e.unit, e.ball_id, e.ball)).collect() }
    }
}

impl P2pMessage {
    /// Serialize to bytes for GossipSub propagation.
    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).expect("P2pMessage serialization is infallible")
    }

    /// Deserialize from GossipSub bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}
