use std::env;
use std::fs;
use std::path::{Path, PathBuf};

fn main() {
    // Copy config and any bundled model next to the executable
    copy_config();
    copy_models();
}

/// The profile directory (target/release or target/debug).
fn target_dir() -> Option<PathBuf> {
    let out_dir = env::var("OUT_DIR").ok()?;
    // OUT_DIR is target/<profile>/build/slotbook-xxx/out
    Path::new(&out_dir).ancestors().nth(3).map(Path::to_path_buf)
}

/// Recursively copies a directory and its contents.
fn copy_dir_recursive(src: &Path, dst: &Path) {
    let _ = fs::create_dir_all(dst);

    if let Ok(entries) = fs::read_dir(src) {
        for entry in entries.flatten() {
            let src_path = entry.path();
            let dst_path = dst.join(entry.file_name());

            if src_path.is_dir() {
                copy_dir_recursive(&src_path, &dst_path);
            } else {
                let _ = fs::copy(&src_path, &dst_path);
            }
        }
    }
}

/// Copies pretrained CAPTCHA weights, if the checkout has any.
fn copy_models() {
    let Some(target_dir) = target_dir() else {
        return;
    };

    let models_src = Path::new("models");
    if models_src.exists() {
        copy_dir_recursive(models_src, &target_dir.join("models"));
        println!("cargo:rerun-if-changed=models/");
    }
}

/// Copies config.json to the target directory.
fn copy_config() {
    let Some(target_dir) = target_dir() else {
        return;
    };

    let config_src = Path::new("config.json");
    if config_src.exists() {
        let _ = fs::copy(config_src, target_dir.join("config.json"));
        println!("cargo:rerun-if-changed=config.json");
    }
}
