use delivery::{EventRouter, Hub};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) router: EventRouter,
    pub(crate) hub: Hub,
}

impl AppState {
    pub(crate) fn storage(&self) -> &storage::Storage {
        self.router.storage()
    }
}
