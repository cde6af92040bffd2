//! The state store.
//!
//! A directory of JSON files, one per named resource, recording the local
//! definition that was last applied, the remote output it produced and the
//! remote identifier. The [`Store`] compares new definitions against these
//! files to decide which lifecycle operation to run.
//!
//! A resource is recorded as soon as its create call returns an identifier.
//! Until it has settled and been read back, the record is *tainted*: it has
//! no remote output, and the next [`Store::resource`] call deletes the
//! remote resource and creates it again.
use std::{ops::Deref, path::PathBuf};

use snafu::prelude::*;

use crate::{
    finder, Action, Changes, CreateStoreDirSnafu, DeserializeSnafu, RenameFileSnafu, Resource,
    Result, ScanStoreDirSnafu, SerializeSnafu, StoreFileDeleteSnafu, StoreFileReadSnafu,
    StoredTypeSnafu, WriteFileSnafu,
};

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
struct InertStoreResource {
    name: String,
    type_name: String,
    id: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    tainted: bool,
    local: serde_json::Value,
    remote: serde_json::Value,
}

/// A resource recorded in the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredResource {
    pub name: String,
    pub type_name: String,
    pub id: String,
    /// The resource was created but never settled.
    pub tainted: bool,
}

/// A typed store record.
enum Stored<T: Resource> {
    Applied { local: T, remote: T::Output },
    Tainted { local: T, id: String },
}

/// The path to an individual resource store file.
fn store_file_path(name: &str, store_path: impl AsRef<std::path::Path>) -> PathBuf {
    store_path.as_ref().join(format!("{name}.json"))
}

/// What [`Store::resource`] would do with a definition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Plan {
    /// Nothing is stored under the name yet.
    Create,
    /// The definition is unchanged, the remote state is only re-read.
    Refresh,
    /// Changed fields can be updated in place.
    Update(Changes),
    /// A changed field forces the resource to be deleted and created again.
    Replace(Changes),
    /// A previous create never settled. The resource is deleted and created
    /// again.
    ReplaceTainted,
}

impl core::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Plan::Create => f.write_str("create"),
            Plan::Refresh => f.write_str("refresh"),
            Plan::Update(changes) => write!(f, "update ({changes})"),
            Plan::Replace(changes) => write!(
                f,
                "replace ({changes}; forced by {})",
                changes.replacing().join(", ")
            ),
            Plan::ReplaceTainted => f.write_str("replace (tainted)"),
        }
    }
}

/// What [`Store::resource`] or [`Store::import`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Refreshed,
    Updated,
    Replaced,
    Imported,
}

/// A resource after it was applied. Dereferences to its remote output.
#[derive(Clone, Debug)]
pub struct Applied<T: Resource> {
    pub name: String,
    pub outcome: Outcome,
    pub local: T,
    pub remote: T::Output,
}

impl<T: Resource> Deref for Applied<T> {
    type Target = T::Output;

    fn deref(&self) -> &Self::Target {
        &self.remote
    }
}

impl<T: Resource> Applied<T> {
    /// The remote identifier.
    pub fn id(&self) -> String {
        T::id(&self.remote)
    }
}

pub struct Store<P> {
    path: PathBuf,
    provider: P,
}

impl<P> Store<P> {
    pub fn new(path: impl AsRef<std::path::Path>, provider: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            provider,
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    fn read_inert(&self, name: &str) -> Result<Option<InertStoreResource>> {
        let path = store_file_path(name, &self.path);
        if !path.exists() {
            return Ok(None);
        }
        log::debug!("{path:?} exists, reading '{name}' from it");
        let contents = std::fs::read_to_string(&path).context(StoreFileReadSnafu { path })?;
        log::trace!(
            "contents:\n{}",
            contents
                .lines()
                .map(|line| format!("  {line}"))
                .collect::<Vec<_>>()
                .join("\n")
        );
        let inert = serde_json::from_str(&contents).context(DeserializeSnafu { name })?;
        Ok(Some(inert))
    }

    fn read_stored<T>(&self, name: &str) -> Result<Option<Stored<T>>>
    where
        T: Resource<Provider = P>,
    {
        let Some(inert) = self.read_inert(name)? else {
            return Ok(None);
        };
        ensure!(
            inert.type_name == T::NAME,
            StoredTypeSnafu {
                name,
                found: inert.type_name,
                expected: T::NAME,
            }
        );
        let local: T = serde_json::from_value(inert.local).context(DeserializeSnafu { name })?;
        if inert.tainted {
            return Ok(Some(Stored::Tainted {
                local,
                id: inert.id,
            }));
        }
        let remote: T::Output = serde_json::from_value(inert.remote).context(DeserializeSnafu {
            name: format!("remote {name}"),
        })?;
        Ok(Some(Stored::Applied { local, remote }))
    }

    /// Writes a store file. The contents go to a temporary file first, which
    /// is then renamed over the store file, so a reader sees either the old
    /// record or the new one.
    async fn write_inert(&self, inert: &InertStoreResource) -> Result<()> {
        tokio::fs::create_dir_all(&self.path)
            .await
            .context(CreateStoreDirSnafu { path: &self.path })?;
        let path = store_file_path(&inert.name, &self.path);
        log::debug!("storing {} to {path:?}", inert.name);
        let contents = serde_json::to_string_pretty(inert).context(SerializeSnafu {
            name: format!("storing {}", inert.name),
        })?;
        let staged = path.with_extension("json.tmp");
        tokio::fs::write(&staged, contents)
            .await
            .context(WriteFileSnafu { path: &staged })?;
        tokio::fs::rename(&staged, &path)
            .await
            .context(RenameFileSnafu { from: staged, path })?;
        Ok(())
    }

    async fn save<T>(&self, name: &str, local: &T, remote: &T::Output) -> Result<()>
    where
        T: Resource<Provider = P>,
    {
        self.write_inert(&InertStoreResource {
            name: name.to_owned(),
            type_name: T::NAME.to_owned(),
            id: T::id(remote),
            tainted: false,
            local: serde_json::to_value(local).context(SerializeSnafu { name })?,
            remote: serde_json::to_value(remote).context(SerializeSnafu {
                name: format!("remote {name}"),
            })?,
        })
        .await
    }

    async fn save_tainted<T>(&self, name: &str, local: &T, id: &str) -> Result<()>
    where
        T: Resource<Provider = P>,
    {
        self.write_inert(&InertStoreResource {
            name: name.to_owned(),
            type_name: T::NAME.to_owned(),
            id: id.to_owned(),
            tainted: true,
            local: serde_json::to_value(local).context(SerializeSnafu { name })?,
            remote: serde_json::Value::Null,
        })
        .await
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let path = store_file_path(name, &self.path);
        if path.exists() {
            log::debug!("removing {name} store file {path:?}");
            tokio::fs::remove_file(&path)
                .await
                .context(StoreFileDeleteSnafu { path })?;
        }
        Ok(())
    }

    /// The resources recorded in the store, sorted by name.
    pub fn list(&self) -> Result<Vec<StoredResource>> {
        if !self.path.exists() {
            return Ok(vec![]);
        }
        let entries = std::fs::read_dir(&self.path).context(ScanStoreDirSnafu { path: &self.path })?;
        let mut resources = vec![];
        for entry in entries {
            let entry = entry.context(ScanStoreDirSnafu { path: &self.path })?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            if let Some(inert) = self.read_inert(name)? {
                resources.push(StoredResource {
                    name: inert.name,
                    type_name: inert.type_name,
                    id: inert.id,
                    tainted: inert.tainted,
                });
            }
        }
        resources.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(resources)
    }

    /// Reports what [`Store::resource`] would do, without calling the
    /// provider.
    pub fn plan<T>(&self, name: &str, local: &T) -> Result<Plan>
    where
        T: Resource<Provider = P>,
    {
        let stored = match self.read_stored::<T>(name)? {
            None => return Ok(Plan::Create),
            Some(Stored::Tainted { .. }) => return Ok(Plan::ReplaceTainted),
            Some(Stored::Applied { local, .. }) => local,
        };
        let changes = local.changes(&stored);
        Ok(if changes.is_empty() {
            Plan::Refresh
        } else if changes.requires_replace() {
            Plan::Replace(changes)
        } else {
            Plan::Update(changes)
        })
    }

    async fn create<T>(&self, name: &str, local: T) -> Result<(T, T::Output)>
    where
        T: Resource<Provider = P>,
    {
        log::info!("creating {} '{name}'", T::NAME);
        let id = local
            .create(&self.provider)
            .await
            .map_err(|e| e.during(Action::Create, T::NAME, name))?;
        log::info!("  created {id}");
        self.save_tainted(name, &local, &id).await?;
        local
            .wait_created(&self.provider, &id)
            .await
            .map_err(|e| e.during(Action::Create, T::NAME, &id))?;
        let remote = local
            .read(&self.provider, &id)
            .await
            .map_err(|e| e.during(Action::Read, T::NAME, &id))?;
        self.save(name, &local, &remote).await?;
        Ok((local, remote))
    }

    /// Deletes the remote resource of a tainted record, if it still exists,
    /// and removes the record. Returns true if something was deleted.
    async fn clear_tainted<T>(&self, name: &str, stored: &T, id: &str) -> Result<bool>
    where
        T: Resource<Provider = P>,
    {
        log::warn!(
            "{} '{name}' ({id}) never settled after it was created, deleting it",
            T::NAME
        );
        let deleted = match stored.read(&self.provider, id).await {
            Ok(remote) => {
                finder::ignore_not_found(stored.delete(&self.provider, &remote).await)
                    .map_err(|e| e.during(Action::Delete, T::NAME, id))?;
                true
            }
            Err(e) if e.is_not_found() => {
                log::debug!("  {id} is already gone");
                false
            }
            Err(e) => return Err(e.during(Action::Read, T::NAME, id)),
        };
        self.remove(name).await?;
        Ok(deleted)
    }

    /// Applies a definition.
    ///
    /// Creates the resource if nothing is stored under `name`. Otherwise
    /// the remote state is refreshed first. A resource that disappeared
    /// outside of the store is created again. A changed definition is
    /// updated in place, or replaced when a `force_new` field changed.
    /// A tainted record is replaced.
    pub async fn resource<T>(&self, name: &str, local: T) -> Result<Applied<T>>
    where
        T: Resource<Provider = P>,
    {
        let applied = |outcome, (local, remote)| Applied {
            name: name.to_owned(),
            outcome,
            local,
            remote,
        };

        let (stored, previous_remote) = match self.read_stored::<T>(name)? {
            None => return Ok(applied(Outcome::Created, self.create(name, local).await?)),
            Some(Stored::Tainted { local: stored, id }) => {
                let outcome = if self.clear_tainted(name, &stored, &id).await? {
                    Outcome::Replaced
                } else {
                    Outcome::Created
                };
                return Ok(applied(outcome, self.create(name, local).await?));
            }
            Some(Stored::Applied { local, remote }) => (local, remote),
        };

        let id = T::id(&previous_remote);
        log::debug!("refreshing {} '{name}' ({id})", T::NAME);
        let remote = match local.read(&self.provider, &id).await {
            Ok(remote) => remote,
            Err(e) if e.is_not_found() => {
                log::warn!(
                    "{} '{name}' ({id}) not found, removing from state: {e}",
                    T::NAME
                );
                self.remove(name).await?;
                return Ok(applied(Outcome::Created, self.create(name, local).await?));
            }
            Err(e) => return Err(e.during(Action::Read, T::NAME, id)),
        };

        let changes = local.changes(&stored);
        if changes.is_empty() {
            log::debug!("  {name} is unchanged");
            self.save(name, &local, &remote).await?;
            return Ok(applied(Outcome::Refreshed, (local, remote)));
        }

        log::info!(
            "{} '{name}' has changed ({changes}):\n{}",
            T::NAME,
            pretty_assertions::Comparison::new(&stored, &local)
        );
        if changes.requires_replace() {
            log::info!(
                "replacing {name}, forced by {}",
                changes.replacing().join(", ")
            );
            finder::ignore_not_found(stored.delete(&self.provider, &remote).await)
                .map_err(|e| e.during(Action::Delete, T::NAME, id))?;
            self.remove(name).await?;
            return Ok(applied(Outcome::Replaced, self.create(name, local).await?));
        }

        log::info!("updating {} '{name}' ({id})", T::NAME);
        let remote = local
            .update(&self.provider, &stored, &remote)
            .await
            .map_err(|e| e.during(Action::Update, T::NAME, id))?;
        self.save(name, &local, &remote).await?;
        Ok(applied(Outcome::Updated, (local, remote)))
    }

    /// Brings an existing remote resource under management.
    ///
    /// Errs if the resource doesn't exist.
    pub async fn import<T>(&self, name: &str, local: T, id: &str) -> Result<Applied<T>>
    where
        T: Resource<Provider = P>,
    {
        if let Some(existing) = self.read_inert(name)? {
            return Err(anyhow::anyhow!(
                "'{name}' is already managed as {} ({})",
                existing.type_name,
                existing.id
            )
            .into());
        }
        log::info!("importing {} '{name}' ({id})", T::NAME);
        let remote = local
            .read(&self.provider, id)
            .await
            .map_err(|e| e.during(Action::Read, T::NAME, id))?;
        self.save(name, &local, &remote).await?;
        Ok(Applied {
            name: name.to_owned(),
            outcome: Outcome::Imported,
            local,
            remote,
        })
    }

    /// Re-reads the remote state of a stored resource.
    ///
    /// Returns `None` if nothing is stored under `name`, or if the remote
    /// resource is gone, in which case it is removed from the store.
    ///
    /// A tainted record stays tainted: only [`Store::resource`] or
    /// [`Store::destroy`] clear it.
    pub async fn refresh<T>(&self, name: &str) -> Result<Option<Applied<T>>>
    where
        T: Resource<Provider = P>,
    {
        let (local, id, tainted) = match self.read_stored::<T>(name)? {
            None => return Ok(None),
            Some(Stored::Tainted { local, id }) => (local, id, true),
            Some(Stored::Applied { local, remote }) => {
                let id = T::id(&remote);
                (local, id, false)
            }
        };
        match local.read(&self.provider, &id).await {
            Ok(remote) => {
                if tainted {
                    log::warn!(
                        "{} '{name}' ({id}) is tainted, it will be replaced on the next apply",
                        T::NAME
                    );
                } else {
                    self.save(name, &local, &remote).await?;
                }
                Ok(Some(Applied {
                    name: name.to_owned(),
                    outcome: Outcome::Refreshed,
                    local,
                    remote,
                }))
            }
            Err(e) if e.is_not_found() => {
                log::warn!(
                    "{} '{name}' ({id}) not found, removing from state: {e}",
                    T::NAME
                );
                self.remove(name).await?;
                Ok(None)
            }
            Err(e) => Err(e.during(Action::Read, T::NAME, id)),
        }
    }

    /// Deletes a stored resource and removes it from the store.
    ///
    /// A resource that is already gone, or was never stored, is not an
    /// error.
    pub async fn destroy<T>(&self, name: &str) -> Result<()>
    where
        T: Resource<Provider = P>,
    {
        let (local, remote) = match self.read_stored::<T>(name)? {
            None => {
                log::debug!("nothing stored as '{name}', nothing to destroy");
                return Ok(());
            }
            Some(Stored::Tainted { local, id }) => {
                self.clear_tainted(name, &local, &id).await?;
                log::info!("  {name} is destroyed");
                return Ok(());
            }
            Some(Stored::Applied { local, remote }) => (local, remote),
        };
        let id = T::id(&remote);
        log::info!("deleting {} '{name}' ({id})", T::NAME);
        finder::ignore_not_found(local.delete(&self.provider, &remote).await)
            .map_err(|e| e.during(Action::Delete, T::NAME, id))?;
        log::info!("  {name} is destroyed");
        self.remove(name).await
    }
}
