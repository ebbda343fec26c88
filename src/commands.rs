//! The three things the tool does: list a registry, dump one image, clone
//! everything.

use std::{
    env,
    path::{Component, Path, PathBuf},
    process::ExitStatus,
};

use tokio::{fs, process::Command};
use tracing::{info, warn};

use crate::{
    config::is_excluded_repository,
    layer::{self, LayerSelection},
    manifest::{resolve_digests, Manifest},
    registry::{RegistryClient, Transport},
    scanner::{self, ScanReport},
    RepossessedError, Result,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryTags {
    pub repository: String,
    pub tags: Vec<String>,
}

/// Print every repository and tag on the registry, plus a ready-to-run dump
/// command per tag.
///
/// With `search`, only tags where both the repository and the tag name
/// contain it are shown. Returns what was shown.
pub async fn enumerate<T: Transport>(
    client: &RegistryClient<T>,
    search: Option<&str>,
    program: &str,
) -> Vec<RepositoryTags> {
    info!("Enumerating host: {}", client.host());
    let mut shown = Vec::new();

    for repo in client.list_repositories().await.into_vec() {
        if is_excluded_repository(&repo) {
            continue;
        }
        println!("Repository: {repo}");

        let tags: Vec<String> = client
            .list_tags(&repo)
            .await
            .into_vec()
            .into_iter()
            .filter(|tag| search.map_or(true, |s| repo.contains(s) && tag.contains(s)))
            .collect();

        for tag in &tags {
            println!("Repository: {repo} Tag: {tag}");
            println!(
                "{program} dump -H {} -r {repo} -t {tag} --first 5",
                client.host()
            );
        }
        println!();

        shown.push(RepositoryTags {
            repository: repo,
            tags,
        });
    }

    shown
}

#[derive(Debug, Clone)]
pub struct DumpOptions {
    pub repo: String,
    pub tag: String,
    pub selection: LayerSelection,
    /// Program run with the extraction directory as its only argument.
    pub run_on_folder: Option<String>,
    pub find_secrets: bool,
}

#[derive(Debug, Clone)]
pub struct DumpOutcome {
    pub dir: PathBuf,
    /// Digests whose layers made it onto disk.
    pub extracted: Vec<String>,
    pub report: Option<ScanReport>,
    pub folder_command: Option<FolderCommandStatus>,
}

/// How the `--run-on-folder` program ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderCommandStatus {
    Exited(ExitStatus),
    /// The program could not be started.
    SpawnFailed(String),
}

impl FolderCommandStatus {
    pub fn success(&self) -> bool {
        matches!(self, FolderCommandStatus::Exited(status) if status.success())
    }
}

/// Pull the selected layers of `repo:tag` into a fresh temporary directory
/// that outlives the process.
pub async fn dump<T: Transport>(
    client: &RegistryClient<T>,
    options: &DumpOptions,
) -> Result<DumpOutcome> {
    dump_in(client, options, &env::temp_dir()).await
}

/// Same as [`dump`], with the temporary directory created under `parent`.
///
/// The directory is only kept when the dump succeeds.
pub async fn dump_in<T: Transport>(
    client: &RegistryClient<T>,
    options: &DumpOptions,
    parent: &Path,
) -> Result<DumpOutcome> {
    let temp = tempfile::Builder::new()
        .prefix("repossessed-")
        .tempdir_in(parent)?;

    let outcome = dump_into(client, options, temp.path()).await?;

    Ok(DumpOutcome {
        dir: temp.keep(),
        ..outcome
    })
}

/// Same as [`dump`] with an explicit target directory.
pub async fn dump_into<T: Transport>(
    client: &RegistryClient<T>,
    options: &DumpOptions,
    dir: &Path,
) -> Result<DumpOutcome> {
    info!(
        "Host: {} Repo: {} Tag: {}",
        client.host(),
        options.repo,
        options.tag
    );

    let manifest = client.get_manifest(&options.repo, &options.tag).await?;
    let digests = manifest_digests(&manifest);
    let selected = options.selection.apply(&digests)?;

    fs::create_dir_all(dir).await?;
    info!("Downloading to temp directory: {}", dir.display());

    let mut extracted = Vec::new();
    for digest in selected {
        let url = client.blob_url(&options.repo, digest)?;
        if layer::fetch_and_extract(client.transfer(), &url, dir)
            .await?
            .is_some()
        {
            extracted.push(digest.clone());
        }
    }

    let report = if options.find_secrets {
        let root = dir.to_path_buf();
        Some(tokio::task::spawn_blocking(move || scanner::scan(&root)).await?)
    } else {
        None
    };

    let folder_command = match &options.run_on_folder {
        Some(program) => Some(run_on_folder(program, dir).await),
        None => None,
    };

    println!("Docker image data extracted to {}", dir.display());

    Ok(DumpOutcome {
        dir: dir.to_path_buf(),
        extracted,
        report,
        folder_command,
    })
}

#[derive(Debug, Clone, Default)]
pub struct CloneSummary {
    /// `repo:tag` references fully extracted.
    pub cloned: Vec<String>,
    /// `repo:tag` references that failed, with the reason.
    pub failed: Vec<(String, RepossessedError)>,
}

/// Mirror every tag of every repository into `output/{repo}/{tag}`, all layers merged.
///
/// A failing tag is logged and recorded, and the clone moves on.
pub async fn clone_registry<T: Transport>(
    client: &RegistryClient<T>,
    output: &Path,
) -> Result<CloneSummary> {
    info!("Clone Host: {} To {}", client.host(), output.display());
    let mut summary = CloneSummary::default();

    for repo in client.list_repositories().await.into_vec() {
        if is_excluded_repository(&repo) {
            continue;
        }
        let Some(repo_dir) = nested_dir(output, &repo) else {
            warn!(%repo, "Skipping repository with an unsafe name");
            continue;
        };
        fs::create_dir_all(&repo_dir).await?;

        for tag in client.list_tags(&repo).await.into_vec() {
            let reference = format!("{repo}:{tag}");
            let Some(tag_dir) = nested_dir(&repo_dir, &tag) else {
                warn!(%reference, "Skipping tag with an unsafe name");
                continue;
            };

            println!("Cloning: {reference} To {}", tag_dir.display());
            fs::create_dir_all(&tag_dir).await?;

            match clone_tag(client, &repo, &tag, &tag_dir).await {
                Ok(()) => summary.cloned.push(reference),
                Err(err) => {
                    warn!(%reference, %err, "Clone failed");
                    summary.failed.push((reference, err));
                }
            }
        }
    }

    Ok(summary)
}

async fn clone_tag<T: Transport>(
    client: &RegistryClient<T>,
    repo: &str,
    tag: &str,
    dir: &Path,
) -> Result<()> {
    let manifest = client.get_manifest(repo, tag).await?;

    for digest in manifest_digests(&manifest) {
        let url = client.blob_url(repo, &digest)?;
        layer::fetch_and_extract(client.transfer(), &url, dir).await?;
    }

    Ok(())
}

fn manifest_digests(manifest: &Manifest) -> Vec<String> {
    if manifest.is_index() {
        let platforms = manifest.manifests.as_ref().map_or(0, Vec::len);
        warn!(platforms, "Manifest is an image index, no layers to pull");
    }

    resolve_digests(manifest)
}

/// `base/name`, as long as `name` stays below `base`.
fn nested_dir(base: &Path, name: &str) -> Option<PathBuf> {
    let relative = Path::new(name);
    let plain = relative
        .components()
        .all(|component| matches!(component, Component::Normal(_)));

    (plain && !name.is_empty()).then(|| base.join(relative))
}

async fn run_on_folder(program: &str, dir: &Path) -> FolderCommandStatus {
    info!("Running {program} on {}", dir.display());

    match Command::new(program).arg(dir).status().await {
        Ok(status) => {
            if !status.success() {
                warn!(%program, %status, "Folder command exited unsuccessfully");
            }
            FolderCommandStatus::Exited(status)
        }
        Err(err) => {
            warn!(%program, %err, "Cannot run folder command");
            FolderCommandStatus::SpawnFailed(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_dir_rejects_escapes() {
        let base = Path::new("/out");

        assert_eq!(
            nested_dir(base, "library/nginx"),
            Some(PathBuf::from("/out/library/nginx"))
        );
        assert_eq!(nested_dir(base, "latest"), Some(PathBuf::from("/out/latest")));
        assert_eq!(nested_dir(base, "../etc"), None);
        assert_eq!(nested_dir(base, "/etc"), None);
        assert_eq!(nested_dir(base, ""), None);
    }
}
