use crate::broadcast::Broadcaster;
use crate::pipeline::Ingestor;
use crate::store::ReadingStore;
use std::sync::Arc;

/// Handles shared by every request handler and listener.
#[derive(Debug, Clone)]
pub struct AppState {
    ingestor: Ingestor,
}

impl AppState {
    pub fn new(store: Arc<dyn ReadingStore>, broadcaster: Broadcaster) -> Self {
        Self {
            ingestor: Ingestor::new(store, broadcaster),
        }
    }

    pub fn ingestor(&self) -> &Ingestor {
        &self.ingestor
    }

    pub fn store(&self) -> &dyn ReadingStore {
        self.ingestor.store().as_ref()
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        self.ingestor.broadcaster()
    }
}
