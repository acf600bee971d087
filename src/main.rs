use minicluster::engine::EngineError;
use minicluster::ui::output;

fn main() {
    if let Err(err) = minicluster::cli::run() {
        output::error(format!("{:#}", err));
        let code = err
            .downcast_ref::<EngineError>()
            .map(EngineError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}
