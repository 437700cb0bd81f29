use log::{debug, info, warn, LevelFilter};
use tempfile::NamedTempFile;

use ideafit::interface::logging;

// The logger is process-global, so this binary holds a single test.
#[test]
fn test_file_log_is_echoed() {
    let file = NamedTempFile::new().unwrap();
    logging::init_file(file.path(), LevelFilter::Info).unwrap();

    info!("session finished with score {}", 42);
    warn!("engine stderr unavailable");
    debug!("below the threshold");

    let mut out = Vec::new();
    let lines = logging::echo_file(file.path(), &mut out).unwrap();
    let text = String::from_utf8(out).unwrap();

    assert_eq!(lines, 2);
    assert!(text.contains("session finished with score 42"), "{}", text);
    assert!(text.contains("engine stderr unavailable"));
    assert!(!text.contains("below the threshold"));
    assert!(!text.contains('\x1b'), "colour codes leaked into the file");

    assert!(logging::init_file(file.path(), LevelFilter::Info).is_err(), "second logger installed");
}
