//! Wire ↔ domain conversions shared by the server and the gRPC transport.

use hkv_types::{CausalReply, HkvError, Op, OpKind, StrongReply, VectorClock};

use crate::v1;

impl From<&VectorClock> for v1::VectorClock {
    fn from(clock: &VectorClock) -> Self {
        v1::VectorClock {
            counters: clock.iter().map(|(r, c)| (r.to_string(), c)).collect(),
        }
    }
}

impl From<v1::VectorClock> for VectorClock {
    fn from(clock: v1::VectorClock) -> Self {
        clock.counters.into_iter().collect()
    }
}

/// A missing clock field is the empty clock.
pub fn clock_from_proto(clock: Option<v1::VectorClock>) -> VectorClock {
    clock.map(VectorClock::from).unwrap_or_default()
}

fn op_kind_to_proto(kind: OpKind) -> v1::OpKind {
    match kind {
        OpKind::Get => v1::OpKind::Get,
        OpKind::Put => v1::OpKind::Put,
    }
}

fn put_op(
    key: String,
    value: String,
    raw_kind: i32,
    client_id: i64,
    sequence: i64,
) -> Result<Op, HkvError> {
    if key.is_empty() {
        return Err(HkvError::InvalidArgument("key must not be empty".into()));
    }
    match v1::OpKind::try_from(raw_kind) {
        Ok(v1::OpKind::Put) => Ok(Op::put(key, value, client_id, sequence)),
        _ => Err(HkvError::InvalidArgument(format!(
            "PutAppend carries unsupported op kind {raw_kind}"
        ))),
    }
}

pub fn op_from_put_request(req: v1::PutAppendRequest) -> Result<Op, HkvError> {
    put_op(req.key, req.value, req.op, req.client_id, req.sequence)
}

pub fn op_from_causal_put_request(
    req: v1::CausalPutAppendRequest,
) -> Result<(Op, VectorClock), HkvError> {
    let clock = clock_from_proto(req.vector_clock);
    let op = put_op(req.key, req.value, req.op, req.client_id, req.sequence)?;
    Ok((op, clock))
}

pub fn put_request(op: &Op) -> v1::PutAppendRequest {
    v1::PutAppendRequest {
        key: op.key.clone(),
        value: op.value.clone().unwrap_or_default(),
        op: op_kind_to_proto(op.kind) as i32,
        client_id: op.client_id,
        sequence: op.sequence,
    }
}

pub fn causal_put_request(op: &Op, clock: &VectorClock) -> v1::CausalPutAppendRequest {
    v1::CausalPutAppendRequest {
        key: op.key.clone(),
        value: op.value.clone().unwrap_or_default(),
        op: op_kind_to_proto(op.kind) as i32,
        client_id: op.client_id,
        sequence: op.sequence,
        vector_clock: Some(clock.into()),
    }
}

pub fn get_reply(reply: StrongReply) -> v1::GetReply {
    v1::GetReply {
        is_leader: reply.is_leader,
        found: reply.value.is_some(),
        value: reply.value.unwrap_or_default(),
    }
}

pub fn strong_reply_from_get(reply: v1::GetReply) -> StrongReply {
    StrongReply {
        is_leader: reply.is_leader,
        value: reply.found.then_some(reply.value),
    }
}

pub fn causal_get_reply(reply: CausalReply) -> v1::CausalGetReply {
    v1::CausalGetReply {
        success: reply.success,
        found: reply.value.is_some(),
        value: reply.value.unwrap_or_default(),
        vector_clock: Some((&reply.clock).into()),
    }
}

pub fn causal_reply_from_get(reply: v1::CausalGetReply) -> CausalReply {
    CausalReply {
        success: reply.success,
        value: reply.found.then_some(reply.value),
        clock: clock_from_proto(reply.vector_clock),
    }
}

pub fn causal_put_reply(reply: CausalReply) -> v1::CausalPutAppendReply {
    v1::CausalPutAppendReply {
        success: reply.success,
        vector_clock: Some((&reply.clock).into()),
    }
}

pub fn causal_reply_from_put(reply: v1::CausalPutAppendReply) -> CausalReply {
    CausalReply {
        success: reply.success,
        value: None,
        clock: clock_from_proto(reply.vector_clock),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_request_rejects_non_put_kinds() {
        let mut req = put_request(&Op::put("k", "v", 1, 2));
        assert_eq!(op_from_put_request(req.clone()).unwrap(), Op::put("k", "v", 1, 2));

        req.op = v1::OpKind::Get as i32;
        assert!(matches!(op_from_put_request(req.clone()), Err(HkvError::InvalidArgument(_))));
        req.op = 42;
        assert!(matches!(op_from_put_request(req), Err(HkvError::InvalidArgument(_))));
    }

    #[test]
    fn empty_key_is_invalid() {
        let req = put_request(&Op::put("", "v", 1, 2));
        assert!(matches!(op_from_put_request(req), Err(HkvError::InvalidArgument(_))));
    }

    #[test]
    fn found_flag_separates_empty_from_absent() {
        let absent = get_reply(StrongReply { is_leader: true, value: None });
        assert!(!absent.found);
        assert_eq!(strong_reply_from_get(absent).value, None);

        let empty = get_reply(StrongReply { is_leader: true, value: Some(String::new()) });
        assert!(empty.found);
        assert_eq!(strong_reply_from_get(empty).value, Some(String::new()));
    }

    #[test]
    fn missing_clock_is_empty() {
        let (_, clock) = op_from_causal_put_request(v1::CausalPutAppendRequest {
            key: "k".into(),
            value: "v".into(),
            op: v1::OpKind::Put as i32,
            client_id: 1,
            sequence: 1,
            vector_clock: None,
        })
        .unwrap();
        assert!(clock.is_empty());
    }

    #[test]
    fn causal_reply_keeps_clock() {
        let clock: VectorClock = [("a", 3u64), ("b", 1)].into_iter().collect();
        let wire = causal_get_reply(CausalReply {
            success: true,
            value: Some("v".into()),
            clock: clock.clone(),
        });
        let back = causal_reply_from_get(wire);
        assert!(back.success);
        assert_eq!(back.clock, clock);
        assert_eq!(back.value.as_deref(), Some("v"));
    }
}
