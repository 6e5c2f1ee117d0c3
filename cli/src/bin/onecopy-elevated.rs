//! onecopy-elevated - the privileged half of onecopy.
//!
//! Started through a privilege launcher, it reads one manifest from stdin
//! (`--manifest`) or takes a single SRC DST pair on the command line, runs
//! the copy without progress, and prints one JSON response on stdout.
//! Exit status: 0 on success, 1 on failure, 2 on usage errors.

use std::io::{self, Read};
use std::path::PathBuf;

use clap::Parser;
use engine::manifest::run_manifest;
use engine::{handle_manifest, ChecksumAlgorithm, Manifest, Response, TransferItem, TransferOptions};

#[derive(Parser, Debug)]
#[command(name = "onecopy-elevated")]
#[command(version)]
#[command(about = "Privileged copy helper for onecopy")]
struct Args {
    /// Source file (single-transfer form)
    #[arg(value_name = "SRC")]
    src: Option<PathBuf>,

    /// Destination file (single-transfer form)
    #[arg(value_name = "DST")]
    dst: Option<PathBuf>,

    /// Copy permission bits onto the destination
    #[arg(long)]
    preserve_mode: bool,

    /// Compute a digest of the destination after writing it
    #[arg(long = "hash")]
    calc_hash: bool,

    /// Digest algorithm: md5, sha256, sha512, blake3
    #[arg(long, value_name = "ALGORITHM", default_value = "sha256")]
    hash_algorithm: ChecksumAlgorithm,

    /// Read a JSON manifest from stdin
    #[arg(long, conflicts_with_all = ["src", "dst"])]
    manifest: bool,
}

impl Args {
    fn defaults(&self) -> TransferOptions {
        TransferOptions {
            preserve_mode: self.preserve_mode,
            compute_digest: self.calc_hash,
            digest_algorithm: self.hash_algorithm,
            ..TransferOptions::default()
        }
    }
}

/// Run one request and return the reply with its exit code.
fn serve(args: &Args, input: &mut dyn Read) -> (Response, i32) {
    if args.manifest {
        let mut text = String::new();
        if let Err(e) = input.read_to_string(&mut text) {
            let response = Response::Error(format!("failed to read manifest: {}", e));
            let code = response.exit_code();
            return (response, code);
        }
        let response = handle_manifest(&text, &args.defaults());
        let code = response.exit_code();
        return (response, code);
    }

    match (&args.src, &args.dst) {
        (Some(src), Some(dst)) => {
            let manifest = Manifest::single(TransferItem::new(src, dst), args.defaults());
            let response = run_manifest(&manifest);
            let code = response.exit_code();
            (response, code)
        }
        _ => (
            Response::Error("missing SRC/DST or --manifest".to_string()),
            2,
        ),
    }
}

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if !e.use_stderr() => e.exit(),
        Err(e) => {
            let rendered = e.to_string();
            eprintln!("{}", rendered);
            let message = rendered.lines().next().unwrap_or("invalid arguments");
            println!("{}", Response::Error(message.to_string()).encode());
            std::process::exit(2);
        }
    };
    onecopy_cli::init_logging(false);

    let (response, code) = serve(&args, &mut io::stdin().lock());
    if let Response::Error(message) = &response {
        tracing::error!(%message, "elevated copy failed");
    }
    println!("{}", response.encode());
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("onecopy-elevated").chain(argv.iter().copied()))
            .expect("parse")
    }

    #[test]
    fn test_missing_arguments_is_usage_error() {
        let (response, code) = serve(&parse(&[]), &mut io::empty());

        assert_eq!(code, 2);
        assert_eq!(
            response,
            Response::Error("missing SRC/DST or --manifest".to_string())
        );
    }

    #[test]
    fn test_single_transfer_reports_result() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let src = temp_dir.path().join("in.txt");
        let dst = temp_dir.path().join("out").join("in.txt");
        fs::write(&src, "hello").expect("write");

        let args = parse(&[
            src.to_str().expect("utf8"),
            dst.to_str().expect("utf8"),
            "--hash",
            "--hash-algorithm",
            "md5",
        ]);
        let (response, code) = serve(&args, &mut io::empty());

        assert_eq!(code, 0);
        match response {
            Response::Result { result, .. } => {
                assert_eq!(result.bytes_transferred, 5);
                assert_eq!(
                    result.digest.as_deref(),
                    Some("5d41402abc4b2a76b9719d911017c592")
                );
                assert_eq!(result.destination, dst);
            }
            other => panic!("expected a result, got {:?}", other),
        }
        assert_eq!(fs::read_to_string(&dst).expect("read"), "hello");
    }

    #[test]
    fn test_manifest_from_input() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let src = temp_dir.path().join("a.txt");
        fs::write(&src, "abc").expect("write");
        let manifest = Manifest::batch(
            vec![TransferItem::new(&src, temp_dir.path().join("b.txt"))],
            TransferOptions::default(),
        )
        .encode()
        .expect("encode");

        let (response, code) = serve(&parse(&["--manifest"]), &mut manifest.as_bytes());

        assert_eq!(code, 0);
        match response {
            Response::Summary(summary) => {
                assert_eq!(summary.total_bytes, 3);
                assert_eq!(summary.item_count, 1);
            }
            other => panic!("expected a summary, got {:?}", other),
        }
    }

    #[test]
    fn test_corrupt_manifest_fails() {
        let (response, code) = serve(&parse(&["--manifest"]), &mut "not json".as_bytes());

        assert_eq!(code, 1);
        assert!(matches!(response, Response::Error(ref m) if m.contains("corrupt manifest")));
    }

    #[test]
    fn test_manifest_conflicts_with_paths() {
        assert!(Args::try_parse_from(["onecopy-elevated", "--manifest", "a", "b"]).is_err());
    }
}
