use crate::core::SchemaRegistry;
use crate::{ForwardHeaders, RegistryError};
use models::{
    Config, LookupFilter, Mode, RegistryKey, RegistryValue, CONTEXT_WILDCARD, LATEST_VERSION,
};

impl SchemaRegistry {
    /// Soft-delete one version, or tombstone it when `permanent`.
    /// `version == -1` resolves to the latest live version.
    #[tracing::instrument(skip(self))]
    pub async fn delete_schema_version(
        &self,
        subject: &str,
        version: i32,
        permanent: bool,
    ) -> Result<i32, RegistryError> {
        let mode = self.effective_mode(subject);
        if mode.is_read_only() {
            return Err(RegistryError::OperationNotPermitted(format!(
                "subject {subject} is in mode {mode}"
            )));
        }

        self.barrier(Some(subject)).await?;

        let filter = if permanent {
            LookupFilter::IncludeDeleted
        } else {
            LookupFilter::Default
        };
        let value = self
            .stored_schema(subject, version, filter)
            .ok_or_else(|| RegistryError::VersionNotFound {
                subject: subject.to_string(),
                version,
            })?;
        let version = value.version;

        let referencing: Vec<i32> = self
            .store
            .cache()
            .referencing_ids(subject, version)
            .into_iter()
            .collect();
        if !referencing.is_empty() {
            return Err(RegistryError::ReferenceExists(referencing));
        }

        if permanent {
            if !value.deleted {
                return Err(RegistryError::SchemaVersionNotSoftDeleted {
                    subject: subject.to_string(),
                    version,
                });
            }
            self.store
                .delete(RegistryKey::schema(subject, version))
                .await?;
        } else {
            let mut value = value;
            value.deleted = true;
            self.store
                .put(
                    RegistryKey::schema(subject, version),
                    RegistryValue::Schema(value),
                )
                .await?;

            // Deleting the last live version retires the subject's own mode
            // and config.
            if self.schema_values(subject).iter().all(|s| s.deleted) {
                self.drop_subject_overrides(subject).await?;
            }
        }

        tracing::info!(subject, version, permanent, "deleted schema version");
        Ok(version)
    }

    /// Soft-delete a whole subject via a watermark record, or tombstone
    /// every version when `permanent`. Returns the deleted versions.
    #[tracing::instrument(skip(self))]
    pub async fn delete_subject(
        &self,
        subject: &str,
        permanent: bool,
    ) -> Result<Vec<i32>, RegistryError> {
        let mode = self.effective_mode(subject);
        if mode.is_read_only() {
            return Err(RegistryError::OperationNotPermitted(format!(
                "subject {subject} is in mode {mode}"
            )));
        }

        self.barrier(Some(subject)).await?;

        let all = self.schema_values(subject);
        if all.is_empty() {
            return Err(RegistryError::SubjectNotFound(subject.to_string()));
        }
        if permanent && all.iter().any(|s| !s.deleted) {
            return Err(RegistryError::SubjectNotSoftDeleted(subject.to_string()));
        }
        let targets: Vec<&models::SchemaValue> = if permanent {
            all.iter().collect()
        } else {
            all.iter().filter(|s| !s.deleted).collect()
        };
        if targets.is_empty() {
            return Err(RegistryError::SubjectNotFound(subject.to_string()));
        }

        let mut referencing: Vec<i32> = Vec::new();
        {
            let cache = self.store.cache();
            for target in &targets {
                referencing.extend(cache.referencing_ids(subject, target.version));
            }
        }
        referencing.sort_unstable();
        referencing.dedup();
        if !referencing.is_empty() {
            return Err(RegistryError::ReferenceExists(referencing));
        }

        let versions: Vec<i32> = targets.iter().map(|s| s.version).collect();

        if permanent {
            for version in &versions {
                self.store
                    .delete(RegistryKey::schema(subject, *version))
                    .await?;
            }
            // Drop the watermark marker along with the versions it covered.
            self.store
                .delete(RegistryKey::DeleteSubject {
                    subject: subject.to_string(),
                })
                .await?;
        } else {
            let watermark = *versions.iter().max().unwrap_or(&LATEST_VERSION);
            self.store
                .put(
                    RegistryKey::DeleteSubject {
                        subject: subject.to_string(),
                    },
                    RegistryValue::DeleteSubject(models::DeleteSubjectValue {
                        subject: subject.to_string(),
                        version: watermark,
                    }),
                )
                .await?;
        }
        self.drop_subject_overrides(subject).await?;

        tracing::info!(subject, permanent, ?versions, "deleted subject");
        Ok(versions)
    }

    /// Merge a config update over the stored config and persist the result.
    pub async fn update_config(
        &self,
        subject: Option<&str>,
        new: Config,
    ) -> Result<Config, RegistryError> {
        self.barrier(subject).await?;

        let old = self.store.cache().config(subject).unwrap_or_default();
        let merged = old.updated_with(&new);

        self.store
            .put(
                RegistryKey::Config {
                    subject: subject.map(str::to_string),
                },
                RegistryValue::Config(models::ConfigValue {
                    subject: subject.map(str::to_string),
                    config: merged.clone(),
                }),
            )
            .await?;
        Ok(merged)
    }

    /// Remove a stored config; reads fall back to the global default again.
    pub async fn delete_config(&self, subject: Option<&str>) -> Result<(), RegistryError> {
        self.barrier(subject).await?;

        if self.store.cache().config(subject).is_none() {
            return Err(RegistryError::SubjectNotFound(
                subject.unwrap_or("global").to_string(),
            ));
        }
        self.store
            .delete(RegistryKey::Config {
                subject: subject.map(str::to_string),
            })
            .await?;
        Ok(())
    }

    /// Set the mode of a subject, or the global mode.
    ///
    /// Entering IMPORT requires that no live subject matches the scope
    /// (unless forced), and clears soft-deleted state out of every cache so
    /// imported ids and versions cannot collide with ghosts.
    pub async fn set_mode(
        &self,
        subject: Option<&str>,
        mode: Mode,
        force: bool,
    ) -> Result<(), RegistryError> {
        if !self.config.mode_mutability {
            return Err(RegistryError::OperationNotPermitted(
                "mode changes are disabled on this cluster".to_string(),
            ));
        }

        self.barrier(subject).await?;

        if mode == Mode::Import {
            let prefix = subject.unwrap_or(CONTEXT_WILDCARD);
            let live = self.store.cache().subjects(prefix, false);
            if !force && !live.is_empty() {
                return Err(RegistryError::OperationNotPermitted(format!(
                    "cannot enter IMPORT mode: {} live subject(s) exist; use force to override",
                    live.len()
                )));
            }
            if let Some(subject) = subject {
                self.store
                    .put(
                        RegistryKey::ClearSubject {
                            subject: subject.to_string(),
                        },
                        RegistryValue::ClearSubject(models::ClearSubjectValue {
                            subject: subject.to_string(),
                        }),
                    )
                    .await?;
            }
        }

        self.store
            .put(
                RegistryKey::Mode {
                    subject: subject.map(str::to_string),
                },
                RegistryValue::Mode(models::ModeValue {
                    subject: subject.map(str::to_string),
                    mode,
                }),
            )
            .await?;

        tracing::info!(subject, %mode, "set mode");
        Ok(())
    }

    /// Remove a subject's stored mode; reads fall back to the global mode.
    pub async fn delete_subject_mode(&self, subject: &str) -> Result<(), RegistryError> {
        self.barrier(Some(subject)).await?;
        self.store
            .delete(RegistryKey::Mode {
                subject: Some(subject.to_string()),
            })
            .await?;
        Ok(())
    }

    // ---- Leader-or-forward dispatch. ----

    pub async fn delete_schema_version_or_forward(
        &self,
        subject: &str,
        version: i32,
        permanent: bool,
        headers: &ForwardHeaders,
    ) -> Result<i32, RegistryError> {
        let lock = self.store.lock_for(subject);
        let _guard = lock.lock().await;

        let view = self.leader_view().await;
        if view.is_leader {
            self.delete_schema_version(subject, version, permanent).await
        } else if let Some(leader) = view.leader {
            self.forwarder
                .delete_schema_version(&leader, headers, subject, version, permanent)
                .await
        } else {
            Err(RegistryError::UnknownLeader)
        }
    }

    pub async fn delete_subject_or_forward(
        &self,
        subject: &str,
        permanent: bool,
        headers: &ForwardHeaders,
    ) -> Result<Vec<i32>, RegistryError> {
        let lock = self.store.lock_for(subject);
        let _guard = lock.lock().await;

        let view = self.leader_view().await;
        if view.is_leader {
            self.delete_subject(subject, permanent).await
        } else if let Some(leader) = view.leader {
            self.forwarder
                .delete_subject(&leader, headers, subject, permanent)
                .await
        } else {
            Err(RegistryError::UnknownLeader)
        }
    }

    pub async fn update_config_or_forward(
        &self,
        subject: Option<&str>,
        new: Config,
        headers: &ForwardHeaders,
    ) -> Result<Config, RegistryError> {
        let lock = self.store.lock_for(subject.unwrap_or_default());
        let _guard = lock.lock().await;

        let view = self.leader_view().await;
        if view.is_leader {
            self.update_config(subject, new).await
        } else if let Some(leader) = view.leader {
            self.forwarder
                .update_config(&leader, headers, subject, &new)
                .await
        } else {
            Err(RegistryError::UnknownLeader)
        }
    }

    pub async fn delete_config_or_forward(
        &self,
        subject: Option<&str>,
        headers: &ForwardHeaders,
    ) -> Result<(), RegistryError> {
        let lock = self.store.lock_for(subject.unwrap_or_default());
        let _guard = lock.lock().await;

        let view = self.leader_view().await;
        if view.is_leader {
            self.delete_config(subject).await
        } else if let Some(leader) = view.leader {
            self.forwarder.delete_config(&leader, headers, subject).await
        } else {
            Err(RegistryError::UnknownLeader)
        }
    }

    pub async fn set_mode_or_forward(
        &self,
        subject: Option<&str>,
        mode: Mode,
        force: bool,
        headers: &ForwardHeaders,
    ) -> Result<(), RegistryError> {
        let lock = self.store.lock_for(subject.unwrap_or_default());
        let _guard = lock.lock().await;

        let view = self.leader_view().await;
        if view.is_leader {
            self.set_mode(subject, mode, force).await
        } else if let Some(leader) = view.leader {
            self.forwarder
                .set_mode(&leader, headers, subject, mode, force)
                .await
        } else {
            Err(RegistryError::UnknownLeader)
        }
    }

    pub async fn delete_subject_mode_or_forward(
        &self,
        subject: &str,
        headers: &ForwardHeaders,
    ) -> Result<(), RegistryError> {
        let lock = self.store.lock_for(subject);
        let _guard = lock.lock().await;

        let view = self.leader_view().await;
        if view.is_leader {
            self.delete_subject_mode(subject).await
        } else if let Some(leader) = view.leader {
            self.forwarder
                .delete_subject_mode(&leader, headers, subject)
                .await
        } else {
            Err(RegistryError::UnknownLeader)
        }
    }

    // Retire a subject's own mode and config records, if any.
    async fn drop_subject_overrides(&self, subject: &str) -> Result<(), RegistryError> {
        let (has_mode, has_config) = {
            let cache = self.store.cache();
            (
                cache.mode(Some(subject)).is_some(),
                cache.config(Some(subject)).is_some(),
            )
        };
        if has_mode {
            self.store
                .delete(RegistryKey::Mode {
                    subject: Some(subject.to_string()),
                })
                .await?;
        }
        if has_config {
            self.store
                .delete(RegistryKey::Config {
                    subject: Some(subject.to_string()),
                })
                .await?;
        }
        Ok(())
    }
}
