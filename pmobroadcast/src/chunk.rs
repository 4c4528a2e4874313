use bytes::Bytes;

/// Unité de sortie de l'encodeur, partagée en lecture seule entre tous les auditeurs.
///
/// Le clonage ne copie pas les données (`Bytes` est compté par référence).
/// `seq` est propre à la piste en cours et ne sert qu'au diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastChunk {
    seq: u64,
    data: Bytes,
}

impl BroadcastChunk {
    pub fn new(seq: u64, data: impl Into<Bytes>) -> Self {
        Self {
            seq,
            data: data.into(),
        }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}
