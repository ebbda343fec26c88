//! Sweep an extracted image filesystem for things worth a closer look:
//! lines mentioning credentials or cloud regions, well-known config files,
//! and packaged Java applications.

use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing::{debug, info};
use walkdir::WalkDir;

/// Files bigger than this are never read.
pub const MAX_FILE_SIZE: u64 = 5 * 1024 * 1024;

/// Cloud provider markers: the literal `AWS` and every public AWS region code.
pub const CLOUD_TERMS: &[&str] = &[
    "AWS",
    "us-east-1",
    "us-east-2",
    "us-west-1",
    "us-west-2",
    "af-south-1",
    "ap-east-1",
    "ap-south-1",
    "ap-south-2",
    "ap-southeast-1",
    "ap-southeast-2",
    "ap-southeast-3",
    "ap-northeast-1",
    "ap-northeast-2",
    "ap-northeast-3",
    "ca-central-1",
    "eu-central-1",
    "eu-central-2",
    "eu-west-1",
    "eu-west-2",
    "eu-west-3",
    "eu-north-1",
    "eu-south-1",
    "eu-south-2",
    "me-south-1",
    "me-central-1",
    "sa-east-1",
];

pub const CREDENTIAL_TERMS: &[&str] = &[
    "jwt",
    "JWT",
    "s3",
    "S3",
    "password",
    "PASSWORD",
    "secret",
    "SECRET",
    "Database=",
];

/// Paths, relative to the image root, that tend to hold deployment secrets.
pub const SENSITIVE_PATHS: &[&str] = &[
    "app/.env",
    "app/.env.prd",
    "app/.env.prod",
    "app/.gitlab-ci.yml",
    "app/appsetting.json",
    "app/appsettings.Production.json",
    "app/config",
    "app/.env.production",
];

const READABLE_EXTENSIONS: &[&str] = &["json", "yaml", "yml", "env", "txt", "csv", "md", "conf"];

/// Extensions that Python's built-in `mimetypes` table maps to `text/*` or
/// `application/json`. Extra types a system `mime.types` file might add are
/// not included.
const TEXT_MIME_EXTENSIONS: &[&str] = &[
    "bat", "c", "css", "csv", "etx", "h", "htm", "html", "ics", "js", "json", "ksh", "markdown",
    "md", "mjs", "pl", "py", "rtx", "sgm", "sgml", "tsv", "txt", "vcf", "vtt", "xml",
];

/// A line that contains one of the search terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    pub term: String,
    pub path: PathBuf,
    /// 1-based.
    pub line_number: usize,
    /// The matching line with surrounding whitespace trimmed.
    pub line: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Set when a top-level `.jar`/`.war` was found. No sweep runs in that case.
    pub spring_boot_artifact: Option<PathBuf>,
    pub matches: Vec<Match>,
    /// Entries of [`SENSITIVE_PATHS`] that exist under the root.
    pub sensitive_paths: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct Scanner {
    terms: Vec<String>,
    max_file_size: u64,
}

impl Default for Scanner {
    fn default() -> Self {
        let terms = CLOUD_TERMS
            .iter()
            .chain(CREDENTIAL_TERMS)
            .map(|term| term.to_string())
            .collect();

        Self {
            terms,
            max_file_size: MAX_FILE_SIZE,
        }
    }
}

impl Scanner {
    pub(crate) fn new(terms: Vec<String>, max_file_size: u64) -> Self {
        Self {
            terms,
            max_file_size,
        }
    }

    /// Run every check against `root`.
    pub fn scan(&self, root: &Path) -> ScanReport {
        if let Some(artifact) = find_spring_boot_artifact(root) {
            info!(
                "Likely spring boot application, found in {} use a tool like jd-gui to decompile",
                artifact.display()
            );
            return ScanReport {
                spring_boot_artifact: Some(artifact),
                ..ScanReport::default()
            };
        }

        let matches = self.search(root);
        for m in &matches {
            info!(
                "Match found in {} on line {}: {}",
                m.path.display(),
                m.line_number,
                m.line
            );
        }

        let sensitive_paths = find_sensitive_paths(root);
        for path in &sensitive_paths {
            info!(
                "File or directory {} exists and might contain valuable information",
                path.display()
            );
        }

        ScanReport {
            spring_boot_artifact: None,
            matches,
            sensitive_paths,
        }
    }

    /// Every line, in every candidate file under `root`, containing any of the terms.
    ///
    /// A line matching several terms is reported once per term. Unreadable
    /// files are skipped.
    pub fn search(&self, root: &Path) -> Vec<Match> {
        let mut matches = Vec::new();

        let files = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(err) => {
                    debug!(%err, "Cannot walk entry");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file());

        for entry in files {
            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            if !is_candidate_path(relative) {
                continue;
            }

            match entry.metadata() {
                Ok(meta) if meta.len() > self.max_file_size => {
                    debug!("Skipping large file: {}", path.display());
                    continue;
                }
                Ok(_) => {}
                Err(err) => {
                    debug!("Could not stat {}: {err}", path.display());
                    continue;
                }
            }

            if !is_readable_file(path) {
                debug!("Skipping non-readable file: {}", path.display());
                continue;
            }

            let content = match fs::read_to_string(path) {
                Ok(content) => content,
                Err(err) => {
                    debug!("Could not read {}: {err}", path.display());
                    continue;
                }
            };

            for (idx, line) in content.lines().enumerate() {
                for term in &self.terms {
                    if line.contains(term.as_str()) {
                        matches.push(Match {
                            term: term.clone(),
                            path: path.to_path_buf(),
                            line_number: idx + 1,
                            line: line.trim().to_string(),
                        });
                    }
                }
            }
        }

        matches
    }
}

/// Scan `root` with the default term list.
pub fn scan(root: &Path) -> ScanReport {
    Scanner::default().scan(root)
}

/// First top-level `.jar` or `.war` entry, in name order.
pub fn find_spring_boot_artifact(root: &Path) -> Option<PathBuf> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(err) => {
            debug!("Cannot list {}: {err}", root.display());
            return None;
        }
    };

    let mut artifacts: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
            name.ends_with(".jar") || name.ends_with(".war")
        })
        .collect();

    artifacts.sort();
    artifacts.into_iter().next()
}

pub fn is_spring_boot_artifact(root: &Path) -> bool {
    find_spring_boot_artifact(root).is_some()
}

pub fn find_sensitive_paths(root: &Path) -> Vec<PathBuf> {
    SENSITIVE_PATHS
        .iter()
        .map(|relative| root.join(relative))
        .filter(|path| path.exists())
        .collect()
}

/// Application code lives under paths mentioning `app` or `html`; vendored
/// dependencies under `node_modules` or `lib` are noise.
fn is_candidate_path(relative: &Path) -> bool {
    let path = relative.to_string_lossy();
    (path.contains("app") || path.contains("html"))
        && !path.contains("node_modules")
        && !path.contains("lib")
}

pub fn is_readable_file(path: &Path) -> bool {
    let Some(ext) = path.extension() else {
        return false;
    };
    let ext = ext.to_string_lossy().to_lowercase();

    TEXT_MIME_EXTENSIONS.contains(&ext.as_str()) || READABLE_EXTENSIONS.contains(&ext.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, relative: &str, content: &[u8]) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn readable_by_extension_or_mime() {
        assert!(is_readable_file(Path::new("app/settings.json")));
        assert!(is_readable_file(Path::new("app/.env.yml")));
        assert!(is_readable_file(Path::new("app/CONFIG.CONF")));
        assert!(is_readable_file(Path::new("html/index.html")));
        assert!(is_readable_file(Path::new("app/main.js")));
        assert!(!is_readable_file(Path::new("app/secrets.bin")));
        assert!(!is_readable_file(Path::new("app/server")));
        assert!(!is_readable_file(Path::new("app/.env")));
        assert!(!is_readable_file(Path::new("app/transform.xsl")));
        assert!(!is_readable_file(Path::new("app/Main.java")));
    }

    #[test]
    fn candidate_paths() {
        assert!(is_candidate_path(Path::new("app/config.json")));
        assert!(is_candidate_path(Path::new("usr/share/nginx/html/index.html")));
        assert!(!is_candidate_path(Path::new("lib/vendor/config.json")));
        assert!(!is_candidate_path(Path::new("app/node_modules/x/config.json")));
        assert!(!is_candidate_path(Path::new("etc/passwd.txt")));
    }

    #[test]
    fn sweep_honours_path_filter_and_size_cap() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        write(root, "app/config.json", b"{\n  \"db\": \"x\",\n    \"pw\": \"password123\"  \n}\n");
        write(root, "lib/vendor/config.json", b"password123\n");

        let mut big = b"password123\n".to_vec();
        big.resize((MAX_FILE_SIZE + 1) as usize, b'a');
        write(root, "app/secrets.bin", &big);
        write(root, "app/huge.txt", &big);

        let matches = Scanner::new(vec!["password".to_string()], MAX_FILE_SIZE).search(root);

        assert_eq!(
            matches,
            vec![Match {
                term: "password".to_string(),
                path: root.join("app/config.json"),
                line_number: 3,
                line: "\"pw\": \"password123\"".to_string(),
            }]
        );
    }

    #[test]
    fn line_matching_several_terms_is_reported_per_term() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "app/.env.txt", b"AWS_SECRET=1 region=eu-west-1\n");

        let terms: Vec<_> = scan(temp.path())
            .matches
            .into_iter()
            .map(|m| m.term)
            .collect();

        assert_eq!(terms, vec!["AWS", "eu-west-1", "SECRET"]);
    }

    #[test]
    fn invalid_utf8_is_skipped() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "app/broken.txt", &[0xff, 0xfe, b'p', b'a', b's', b's']);
        write(temp.path(), "app/ok.txt", b"secret here\n");

        let matches = scan(temp.path()).matches;
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].path, temp.path().join("app/ok.txt"));
    }

    #[test]
    fn spring_boot_artifact_stops_the_sweep() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "app.jar", b"PK");
        write(temp.path(), "app/config.json", b"password=hunter2\n");
        write(temp.path(), "app/.env", b"SECRET=1\n");

        assert!(is_spring_boot_artifact(temp.path()));

        let report = scan(temp.path());
        assert_eq!(report.spring_boot_artifact, Some(temp.path().join("app.jar")));
        assert!(report.matches.is_empty());
        assert!(report.sensitive_paths.is_empty());
    }

    #[test]
    fn nested_archives_are_not_spring_boot() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "opt/app/app.war", b"PK");

        assert!(!is_spring_boot_artifact(temp.path()));
        assert!(!is_spring_boot_artifact(&temp.path().join("missing")));
    }

    #[test]
    fn sensitive_paths_are_reported() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "app/.env", b"");
        write(temp.path(), "app/config/database.yml", b"");

        let report = scan(temp.path());
        assert_eq!(
            report.sensitive_paths,
            vec![temp.path().join("app/.env"), temp.path().join("app/config")]
        );
    }
}
