use log_fanout::{init, Error, Settings};
use tempfile::tempdir;

// The global facade can be initialized once per process, so the whole
// lifecycle lives in a single test.
#[test]
fn global_facade_lifecycle() {
    assert!(matches!(log_fanout::get_logger("early"), Err(Error::NotInitialized)));

    let dir = tempdir().unwrap();
    let settings = Settings {
        logs_dir: Some(dir.path().to_path_buf()),
        enable_console: false,
        ..Settings::default()
    };
    let guard = init(settings.clone()).unwrap();
    assert!(matches!(init(settings), Err(Error::AlreadyInitialized)));

    let logger = log_fanout::get_logger("svc").unwrap();
    assert!(std::sync::Arc::ptr_eq(&logger, &log_fanout::get_logger("svc").unwrap()));
    assert!(matches!(log_fanout::get_logger("app"), Err(Error::ReservedName(_))));
    logger.info("through the facade");

    drop(guard);
    let system = log_fanout::init::system().unwrap();
    assert!(system.is_shut_down());
    assert!(matches!(log_fanout::get_logger("late"), Err(Error::ShutDown)));

    let written = std::fs::read_to_string(dir.path().join("svc.log")).unwrap();
    assert_eq!(written.lines().count(), 1);
    assert!(written.contains("through the facade"));
}
