use crate::admission::Admission;
// app's shared state, built once at startup

#[derive(Clone)]
pub struct AppState {
    pub admission: Admission,
}
