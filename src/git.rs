//! Version control of the project checkout via libgit2.
//!
//! The [`GitManager`] covers what release builds need: switching to the
//! branch of a build configuration, fast-forward pulls from `origin`, and
//! syncing to a release tag together with its submodules.

use std::path::{Path, PathBuf};

use git2::build::CheckoutBuilder;
use git2::{BranchType, Cred, FetchOptions, RemoteCallbacks, Repository};
use tracing::{debug, info};

/// Branch that builds of `configuration` come from, or `None` for an unknown
/// configuration. macOS builds live on `-mac` branches.
pub fn release_branch(configuration: &str) -> Option<String> {
    let base = match configuration {
        "Debug" | "DebugGame" | "Development" => "development",
        "Test" => "test",
        "Shipping" => "release",
        _ => return None,
    };
    if cfg!(target_os = "macos") {
        Some(format!("{base}-mac"))
    } else {
        Some(base.to_string())
    }
}

pub struct GitManager {
    repo: Repository,
    ssh_key: Option<PathBuf>,
}

impl GitManager {
    pub fn open(path: &Path) -> Result<Self, git2::Error> {
        let repo = Repository::open(path)?;
        Ok(Self { repo, ssh_key: None })
    }

    /// Private key offered when `origin` asks for SSH authentication.
    pub fn with_ssh_key(mut self, key: Option<PathBuf>) -> Self {
        self.ssh_key = key;
        self
    }

    pub fn current_branch(&self) -> Result<String, git2::Error> {
        let head = self.repo.head()?;
        head.shorthand()
            .map(str::to_string)
            .ok_or_else(|| git2::Error::from_str("branch name is not valid UTF-8"))
    }

    /// Force-checks out `name`, creating it from `origin/<name>` when only the
    /// remote branch exists.
    pub fn checkout_branch(&self, name: &str) -> Result<(), git2::Error> {
        let branch = match self.repo.find_branch(name, BranchType::Local) {
            Ok(b) => b,
            Err(_) => {
                let upstream = format!("origin/{name}");
                let remote = self.repo.find_branch(&upstream, BranchType::Remote)?;
                let commit = remote.get().peel_to_commit()?;
                let mut local = self.repo.branch(name, &commit, false)?;
                local.set_upstream(Some(&upstream))?;
                local
            }
        };

        let refname = branch
            .get()
            .name()
            .ok_or_else(|| git2::Error::from_str("branch name is not valid UTF-8"))?
            .to_string();
        let target = self.repo.revparse_single(&refname)?;
        self.repo
            .checkout_tree(&target, Some(CheckoutBuilder::default().force()))?;
        self.repo.set_head(&refname)?;
        info!(branch = name, "checked out branch");
        Ok(())
    }

    /// Fetches the current branch from `origin` and fast-forwards to it.
    /// Returns whether HEAD moved. Diverged histories are an error.
    pub fn pull(&self) -> Result<bool, git2::Error> {
        let branch = self.current_branch()?;
        let mut remote = self.repo.find_remote("origin")?;
        let mut options = self.fetch_options();
        remote.fetch(&[branch.as_str()], Some(&mut options), None)?;

        let fetch_head = self.repo.find_reference("FETCH_HEAD")?;
        let fetched = self.repo.reference_to_annotated_commit(&fetch_head)?;
        let (analysis, _) = self.repo.merge_analysis(&[&fetched])?;

        if analysis.is_up_to_date() {
            debug!(branch = %branch, "already up to date");
            return Ok(false);
        }
        if !analysis.is_fast_forward() {
            return Err(git2::Error::from_str(
                "pull requires a merge, only fast-forward is supported",
            ));
        }

        let refname = format!("refs/heads/{branch}");
        let mut reference = self.repo.find_reference(&refname)?;
        reference.set_target(fetched.id(), "pull: fast-forward")?;
        self.repo.set_head(&refname)?;
        self.repo
            .checkout_head(Some(CheckoutBuilder::default().force()))?;
        info!(branch = %branch, commit = %fetched.id(), "fast-forwarded");
        Ok(true)
    }

    /// The tag pointing at the most recently committed commit.
    pub fn latest_tag(&self) -> Result<Option<String>, git2::Error> {
        let names = self.repo.tag_names(None)?;
        let mut latest: Option<(i64, String)> = None;
        for name in names.iter().flatten() {
            let commit = self
                .repo
                .revparse_single(&format!("refs/tags/{name}"))?
                .peel_to_commit()?;
            let time = commit.time().seconds();
            if latest.as_ref().is_none_or(|(t, _)| time > *t) {
                latest = Some((time, name.to_string()));
            }
        }
        Ok(latest.map(|(_, name)| name))
    }

    /// Detaches HEAD at `tag`, discarding local changes, then updates submodules.
    pub fn checkout_tag(&self, tag: &str) -> Result<(), git2::Error> {
        let commit = self
            .repo
            .revparse_single(&format!("refs/tags/{tag}"))?
            .peel_to_commit()?;
        self.repo
            .checkout_tree(commit.as_object(), Some(CheckoutBuilder::default().force()))?;
        self.repo.set_head_detached(commit.id())?;
        info!(tag, commit = %commit.id(), "checked out tag");
        self.update_submodules()
    }

    pub fn update_submodules(&self) -> Result<(), git2::Error> {
        for mut submodule in self.repo.submodules()? {
            debug!(path = %submodule.path().display(), "updating submodule");
            let mut options = git2::SubmoduleUpdateOptions::new();
            options.fetch(self.fetch_options());
            submodule.update(true, Some(&mut options))?;
        }
        Ok(())
    }

    fn fetch_options(&self) -> FetchOptions<'static> {
        let key = self.ssh_key.clone();
        let mut callbacks = RemoteCallbacks::new();
        callbacks.credentials(move |_url, username, allowed| {
            let user = username.unwrap_or("git");
            if allowed.is_ssh_key() {
                match &key {
                    Some(key) => Cred::ssh_key(user, None, key, None),
                    None => Cred::ssh_key_from_agent(user),
                }
            } else {
                Cred::default()
            }
        });
        let mut options = FetchOptions::new();
        options.remote_callbacks(callbacks);
        options
    }
}
