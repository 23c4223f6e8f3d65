use filebridge::config::{Config, Lang};
use std::env;

// helper to clear env vars
fn clear_env() {
    env::remove_var("FILEBRIDGE_SAVE_DIR");
    env::remove_var("FILEBRIDGE_LANG");
    env::remove_var("FILEBRIDGE_COMPRESS_IMAGES");
    env::remove_var("FILEBRIDGE_IMAGE_QUALITY");
    env::remove_var("FILEBRIDGE_KEEP_ORIGINAL");
    env::remove_var("WORKER_THREADS");
}

#[test]
fn test_config_behavior() {
    // Run these sequentially to avoid race conditions with environment variables

    // 1. Test Defaults
    clear_env();

    let config = Config::from_env();

    assert!(config.save_dir.ends_with("FileBridge"));
    assert_eq!(config.lang, Lang::Ja);
    assert!(!config.compression.enabled);
    assert_eq!(config.compression.quality, 80);
    assert!(!config.compression.keep_original);
    assert_eq!(config.worker_threads, 8);

    // 2. Test From Env
    clear_env();

    env::set_var("FILEBRIDGE_SAVE_DIR", "/tmp/test_uploads");
    env::set_var("FILEBRIDGE_LANG", "en");
    env::set_var("FILEBRIDGE_COMPRESS_IMAGES", "true");
    env::set_var("FILEBRIDGE_IMAGE_QUALITY", "65");
    env::set_var("FILEBRIDGE_KEEP_ORIGINAL", "1");
    env::set_var("WORKER_THREADS", "4");

    let config = Config::from_env();

    assert_eq!(config.save_dir.to_str().unwrap(), "/tmp/test_uploads");
    assert_eq!(config.lang, Lang::En);
    assert!(config.compression.enabled);
    assert_eq!(config.compression.quality, 65);
    assert!(config.compression.keep_original);
    assert_eq!(config.worker_threads, 4);

    // 3. Garbage falls back to defaults
    clear_env();

    env::set_var("FILEBRIDGE_LANG", "de");
    env::set_var("FILEBRIDGE_IMAGE_QUALITY", "0");
    env::set_var("WORKER_THREADS", "lots");

    let config = Config::from_env();

    assert_eq!(config.lang, Lang::Ja);
    assert_eq!(config.compression.quality, 80);
    assert_eq!(config.worker_threads, 8);

    // Cleanup
    clear_env();
}
