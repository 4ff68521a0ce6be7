#![no_main]

use std::fs;
use std::sync::OnceLock;

use libfuzzer_sys::fuzz_target;
use tempfile::tempdir;
use tokio::runtime::Runtime;
use tyger_core::Buffer;
use tyger_store::{Durable, FileRegistryStore};

fn runtime() -> &'static Runtime {
    static RT: OnceLock<Runtime> = OnceLock::new();
    RT.get_or_init(|| Runtime::new().expect("building fuzz runtime"))
}

fuzz_target!(|data: &[u8]| {
    let Ok(td) = tempdir() else { return };
    if fs::write(td.path().join("a.json"), data).is_err() {
        return;
    }
    let store = FileRegistryStore::new(td.path());
    let _: Result<Vec<(String, Buffer)>, _> = runtime().block_on(store.load_all());
});
