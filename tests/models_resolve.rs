use pdf_extractor::config::Config;
use pdf_extractor::models::ModelCache;

fn env_value<'a>(env: &'a [(String, String)], key: &str) -> Option<&'a str> {
    env.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}

#[test]
fn override_dir_is_read_offline() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().to_string_lossy().into_owned();

    let cache = ModelCache::resolve_with(&Config::default(), Some(&dir)).unwrap();

    assert_eq!(cache.dir(), tmp.path());
    assert!(cache.offline());
    let env = cache.env_vars();
    assert_eq!(env_value(&env, "HF_HUB_OFFLINE"), Some("1"));
    assert_eq!(env_value(&env, "DOCLING_ARTIFACTS_PATH"), Some(dir.as_str()));
    // Read-only: nothing is created under an override.
    assert!(!tmp.path().join("huggingface").exists());
}

#[test]
fn missing_override_dir_is_an_error() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("absent").to_string_lossy().into_owned();
    assert!(ModelCache::resolve_with(&Config::default(), Some(&dir)).is_err());
}

#[test]
fn configured_dir_is_prepared_for_downloads() {
    let tmp = tempfile::tempdir().unwrap();
    let mut cfg = Config::default();
    cfg.paths.models_dir = tmp.path().join("models").to_string_lossy().into_owned();

    let cache = ModelCache::resolve_with(&cfg, None).unwrap();

    assert_eq!(cache.dir(), tmp.path().join("models"));
    assert!(!cache.offline());
    assert!(tmp.path().join("models/huggingface/hub").is_dir());
    assert!(tmp.path().join("models/transformers").is_dir());
    let env = cache.env_vars();
    let hub = tmp.path().join("models/huggingface/hub").display().to_string();
    assert_eq!(env_value(&env, "HF_HUB_CACHE"), Some(hub.as_str()));
    assert_eq!(env_value(&env, "HF_HUB_OFFLINE"), None);
}
