use crate::dispatch::DispatchService;

#[derive(Clone)]
pub struct AppState {
    pub dispatch: DispatchService,
}

impl AppState {
    pub fn new(dispatch: DispatchService) -> Self {
        Self { dispatch }
    }
}
