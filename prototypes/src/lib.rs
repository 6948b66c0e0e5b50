use rkyv::{Archive, Deserialize, Serialize};

#[derive(Archive, Deserialize, Serialize, Debug, PartialEq)]
#[archive_attr(repr(C))]
pub struct ChunkRecord {
    pub id: u64,
    pub embedding: Vec<f32>,
    pub metadata: String, // Simulating JSON for now
}

#[derive(Archive, Deserialize, Serialize, Debug, PartialEq)]
#[archive_attr(repr(C))]
pub struct JobRecord {
    pub id: u64,
    pub container_id: u64,
    pub kind: u8,
    pub retries: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rkyv_zero_copy() {
        let chunk = ChunkRecord {
            id: 1,
            embedding: vec![0.1, 0.2, 0.3],
            metadata: "{\"modality\": \"text\"}".to_string(),
        };

        // Serialize
        let bytes = rkyv::to_bytes::<_, 256>(&chunk).expect("failed to serialize");

        // Deserialize (Zero-copy access)
        let archived = unsafe { rkyv::archived_root::<ChunkRecord>(&bytes[..]) };

        assert_eq!(archived.id, 1);
        assert_eq!(archived.embedding.len(), 3);
        // Note: rkyv strings are not standard rust strings, need conversion or direct comparison
        assert_eq!(archived.metadata, "{\"modality\": \"text\"}");
    }
}
