use ureport_engine::Engine;

pub struct AppState {
  pub engine: Engine,
  /// Public base URL of this server, used to link known reports.
  pub public_url: Option<String>,
}
