//! PayloadCodec - conversion between typed mutations and stored payloads.
//!
//! JSON only appears at two boundaries: when a mutation is enqueued and
//! when a handler receives it. Everything in between carries `serde_json::Value`.

use super::mutation::Mutation;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode {op_type} payload: {source}")]
    Encode {
        op_type: &'static str,
        source: serde_json::Error,
    },

    #[error("failed to decode {op_type} payload: {source}")]
    Decode {
        op_type: &'static str,
        source: serde_json::Error,
    },
}

pub struct PayloadCodec;

impl PayloadCodec {
    /// Encode a mutation into an operation payload.
    pub fn encode<M: Mutation>(mutation: &M) -> Result<serde_json::Value, CodecError> {
        serde_json::to_value(mutation).map_err(|source| CodecError::Encode {
            op_type: M::TYPE,
            source,
        })
    }

    /// Decode an operation payload back into `M`.
    ///
    /// Fails with `CodecError::Decode` when the payload no longer matches `M`.
    pub fn decode<M: Mutation>(payload: serde_json::Value) -> Result<M, CodecError> {
        serde_json::from_value(payload).map_err(|source| CodecError::Decode {
            op_type: M::TYPE,
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typed::mutation::fixtures::CreateTask;

    #[test]
    fn encode_then_decode() {
        let task = CreateTask {
            title: "Buy milk".to_string(),
        };
        let payload = PayloadCodec::encode(&task).unwrap();
        assert_eq!(payload, serde_json::json!({"title": "Buy milk"}));

        let back: CreateTask = PayloadCodec::decode(payload).unwrap();
        assert_eq!(back, task);
    }

    #[test]
    fn decode_error_names_the_type() {
        let err = PayloadCodec::decode::<CreateTask>(serde_json::json!({"name": 1})).unwrap_err();
        assert!(matches!(err, CodecError::Decode { op_type: "createTask", .. }));
        assert!(err.to_string().contains("createTask"));
    }
}
