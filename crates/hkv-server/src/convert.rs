use hkv_proto::metadata;
use hkv_types::HkvError;
use tonic::metadata::MetadataValue;
use tonic::Status;

pub fn hkv_to_status(err: HkvError) -> Status {
    match &err {
        HkvError::ConsensusTimeout { index, timeout_ms } => {
            let mut status = Status::deadline_exceeded(err.to_string());
            let md = status.metadata_mut();
            md.insert(
                metadata::ERROR_KIND,
                MetadataValue::from_static(metadata::CONSENSUS_TIMEOUT),
            );
            if let Ok(val) = MetadataValue::try_from(index.to_string().as_str()) {
                md.insert(metadata::APPLY_INDEX, val);
            }
            if let Ok(val) = MetadataValue::try_from(timeout_ms.to_string().as_str()) {
                md.insert(metadata::APPLY_TIMEOUT_MS, val);
            }
            status
        }
        HkvError::InvalidArgument(_) => Status::invalid_argument(err.to_string()),
        HkvError::NotLeader | HkvError::CausalStale => Status::unavailable(err.to_string()),
        HkvError::DeadlineExceeded => Status::deadline_exceeded(err.to_string()),
        HkvError::Cancelled => Status::cancelled(err.to_string()),
        HkvError::Transport(_)
        | HkvError::RetriesExhausted { .. }
        | HkvError::Storage(_)
        | HkvError::Consensus(_) => Status::internal(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use tonic::Code;

    use super::*;

    #[test]
    fn consensus_timeout_is_tagged() {
        let status = hkv_to_status(HkvError::ConsensusTimeout { index: 4, timeout_ms: 10 });
        assert_eq!(status.code(), Code::DeadlineExceeded);
        let md = status.metadata();
        let value = |key: &str| md.get(key).unwrap().to_str().unwrap().to_string();
        assert_eq!(value(metadata::ERROR_KIND), metadata::CONSENSUS_TIMEOUT);
        assert_eq!(value(metadata::APPLY_INDEX), "4");
        assert_eq!(value(metadata::APPLY_TIMEOUT_MS), "10");
    }

    #[test]
    fn storage_errors_are_internal() {
        let status = hkv_to_status(HkvError::Storage("disk".into()));
        assert_eq!(status.code(), Code::Internal);
        assert!(status.metadata().get(metadata::ERROR_KIND).is_none());
    }

    #[test]
    fn invalid_argument_passes_through() {
        let status = hkv_to_status(HkvError::InvalidArgument("key must not be empty".into()));
        assert_eq!(status.code(), Code::InvalidArgument);
    }
}
