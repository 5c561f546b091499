//! Model resolution and download.
//!
//! `embeddings.modelPath` is an opaque identifier: a local filesystem path,
//! an `hf:<org>/<repo>` Hugging Face specifier, or an `http(s)://` base URL.
//! Remote specifiers resolve into the embeddings cache directory, fetching
//! `model.onnx` and `tokenizer.json` once with atomic tmp-and-rename writes.

use crate::error::{Error, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Read;
use std::path::{Path, PathBuf};

pub const MODEL_FILE: &str = "model.onnx";
pub const TOKENIZER_FILE: &str = "tokenizer.json";

/// Resolve a model specifier to a local directory containing `model.onnx`
/// and `tokenizer.json`, downloading into `cache_dir` when remote.
pub fn resolve_model(model_path: &str, cache_dir: &Path) -> Result<PathBuf> {
    if let Some(repo) = model_path.strip_prefix("hf:") {
        let base = format!("https://huggingface.co/{repo}/resolve/main");
        // Sentence-transformers exports keep the ONNX graph under onnx/.
        return fetch_into_cache(
            model_path,
            &format!("{base}/onnx/{MODEL_FILE}"),
            &format!("{base}/{TOKENIZER_FILE}"),
            cache_dir,
        );
    }

    if model_path.starts_with("http://") || model_path.starts_with("https://") {
        let base = model_path.trim_end_matches('/');
        return fetch_into_cache(
            model_path,
            &format!("{base}/{MODEL_FILE}"),
            &format!("{base}/{TOKENIZER_FILE}"),
            cache_dir,
        );
    }

    let local = crate::config::expand_tilde(model_path);
    if local.is_dir() {
        return Ok(local);
    }
    if local.is_file() {
        // A direct .onnx path; the tokenizer must sit next to it.
        let parent = local
            .parent()
            .ok_or_else(|| Error::EmbeddingsUnavailable(format!("{model_path} has no parent")))?;
        return Ok(parent.to_path_buf());
    }

    Err(Error::EmbeddingsUnavailable(format!(
        "model not found: {model_path} (expected a local path, hf:<org>/<repo>, or an http(s) URL)"
    )))
}

fn fetch_into_cache(
    specifier: &str,
    model_url: &str,
    tokenizer_url: &str,
    cache_dir: &Path,
) -> Result<PathBuf> {
    let target = cache_dir.join(sanitize_specifier(specifier));
    std::fs::create_dir_all(&target)?;

    let model_dest = target.join(MODEL_FILE);
    if !model_dest.exists() {
        tracing::info!(url = model_url, "downloading embedding model");
        download_file(model_url, &model_dest)?;
    }

    let tokenizer_dest = target.join(TOKENIZER_FILE);
    if !tokenizer_dest.exists() {
        tracing::info!(url = tokenizer_url, "downloading tokenizer");
        download_file(tokenizer_url, &tokenizer_dest)?;
    }

    Ok(target)
}

/// Turn a model specifier into a safe single-level directory name.
fn sanitize_specifier(specifier: &str) -> String {
    specifier
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
            c
        } else {
            '_'
        })
        .collect()
}

/// Download a file with a progress bar. Uses atomic write (tmp + rename).
fn download_file(url: &str, dest: &Path) -> Result<()> {
    let response = reqwest::blocking::get(url)
        .map_err(|e| Error::EmbeddingsUnavailable(format!("request failed for {url}: {e}")))?;

    if !response.status().is_success() {
        return Err(Error::EmbeddingsUnavailable(format!(
            "download failed with HTTP {} for {url}",
            response.status()
        )));
    }

    let pb = match response.content_length() {
        Some(size) => {
            let pb = ProgressBar::new(size);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("  {bar:40.cyan/blue} {bytes}/{total_bytes} ({eta})")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("##-"),
            );
            pb
        }
        None => ProgressBar::new_spinner(),
    };

    let tmp_path = dest.with_extension("tmp");
    let mut file = std::fs::File::create(&tmp_path)?;
    let mut reader = pb.wrap_read(response.take(u64::MAX));
    std::io::copy(&mut reader, &mut file)?;
    drop(file);

    std::fs::rename(&tmp_path, dest)?;
    pb.finish_and_clear();
    Ok(())
}
