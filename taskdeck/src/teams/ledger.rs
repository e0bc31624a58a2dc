//! The membership ledger.
//!
//! # Team Lifecycle
//!
//! 1. A signed-in identity calls [`MembershipLedger::create`]; the ledger
//!    generates an unused team ID and join code, records the caller as
//!    creator and first member, and selects the new team
//! 2. Others call [`MembershipLedger::join_by_code`] with the code in any
//!    letter case; joining twice reports [`JoinOutcome::AlreadyMember`]
//! 3. Members may [`leave`](MembershipLedger::leave); the creator may not
//! 4. The creator calls [`delete`](MembershipLedger::delete), which drops
//!    the team and every membership referencing it
//!
//! Every change is written to storage first and only then applied in
//! memory. A change touching several keys writes memberships before teams
//! and the selection last; if any write fails, the keys already written
//! are put back to their previous values before the error is returned, so
//! storage and memory both stay as they were.

use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;

use taskdeck_proto::auth::{Identity, LocalUser};
use taskdeck_proto::codec;
use taskdeck_proto::team::{JoinCode, Membership, OwnershipStatus, Team, TeamId};

use super::storage::{LedgerStorage, StorageError, StorageKey};
use super::{IdentitySync, JoinOutcome, LedgerError, UnownedDeletePolicy, codes};
use crate::auth::IdentityProvider;
use crate::tasks::palette;

/// Teams, memberships, and the selected team, backed by a [`LedgerStorage`].
pub struct MembershipLedger<S: LedgerStorage, I: IdentityProvider> {
    /// Persistence.
    storage: S,
    /// Authoritative identity.
    identity: I,
    /// Delete rule for teams without a creator.
    policy: UnownedDeletePolicy,
    /// Cached user record, reconciled on load.
    user: Option<LocalUser>,
    /// Known teams, newest first.
    teams: Vec<Team>,
    /// Membership relation.
    memberships: Vec<Membership>,
    /// Selected team.
    current_team: Option<TeamId>,
}

impl<S: LedgerStorage, I: IdentityProvider> MembershipLedger<S, I> {
    /// Creates an empty ledger. Call [`load`](Self::load) to read storage.
    pub const fn new(storage: S, identity: I, policy: UnownedDeletePolicy) -> Self {
        Self {
            storage,
            identity,
            policy,
            user: None,
            teams: Vec::new(),
            memberships: Vec::new(),
            current_team: None,
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// The cached user record.
    #[must_use]
    pub const fn local_user(&self) -> Option<&LocalUser> {
        self.user.as_ref()
    }

    /// Every known team, newest first.
    #[must_use]
    pub fn teams(&self) -> &[Team] {
        &self.teams
    }

    /// The membership relation.
    #[must_use]
    pub fn memberships(&self) -> &[Membership] {
        &self.memberships
    }

    /// The selected team.
    #[must_use]
    pub const fn current_team(&self) -> Option<&TeamId> {
        self.current_team.as_ref()
    }

    /// A known team.
    #[must_use]
    pub fn team(&self, team_id: &TeamId) -> Option<&Team> {
        self.teams.iter().find(|t| &t.id == team_id)
    }

    /// Returns `true` if the signed-in identity is a member of the team.
    #[must_use]
    pub fn is_member(&self, team_id: &TeamId) -> bool {
        self.identity
            .identity()
            .is_some_and(|caller| self.has_membership(&caller, team_id))
    }

    /// Teams the signed-in identity created.
    #[must_use]
    pub fn owned_teams(&self) -> Vec<&Team> {
        let Some(caller) = self.identity.identity() else {
            return Vec::new();
        };
        self.teams
            .iter()
            .filter(|t| t.is_creator(&caller.id))
            .collect()
    }

    /// Teams the signed-in identity joined but did not create.
    #[must_use]
    pub fn joined_teams(&self) -> Vec<&Team> {
        let Some(caller) = self.identity.identity() else {
            return Vec::new();
        };
        self.teams
            .iter()
            .filter(|t| !t.is_creator(&caller.id) && self.has_membership(&caller, &t.id))
            .collect()
    }

    fn has_membership(&self, caller: &Identity, team_id: &TeamId) -> bool {
        self.memberships
            .iter()
            .any(|m| m.user_id == caller.id && &m.team_id == team_id)
    }

    fn caller(&self) -> Result<Identity, LedgerError> {
        self.identity.identity().ok_or(LedgerError::NoIdentity)
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    async fn read_json<T: DeserializeOwned>(&self, key: StorageKey) -> Result<Option<T>, LedgerError> {
        let Some(raw) = self.storage.get(key).await? else {
            return Ok(None);
        };
        codec::decode(raw.as_bytes())
            .map(Some)
            .map_err(|e| {
                LedgerError::Storage(StorageError::Corrupt {
                    key,
                    reason: e.to_string(),
                })
            })
    }

    async fn write_json<T: Serialize + Sync>(&self, key: StorageKey, value: &T) -> Result<(), LedgerError> {
        let text = codec::encode_string(value)?;
        self.storage.set(key, text).await?;
        tracing::debug!(key = %key, "ledger persisted");
        Ok(())
    }

    /// Writes each key in order, `None` meaning remove. On failure the keys
    /// already written get their previous values back.
    async fn write_all(
        &self,
        writes: Vec<(StorageKey, Option<String>)>,
    ) -> Result<(), LedgerError> {
        let mut previous = Vec::with_capacity(writes.len());
        for (key, _) in &writes {
            previous.push((*key, self.storage.get(*key).await?));
        }
        for (done, (key, value)) in writes.into_iter().enumerate() {
            let result = match value {
                Some(text) => self.storage.set(key, text).await,
                None => self.storage.remove(key).await,
            };
            if let Err(err) = result {
                tracing::warn!(key = %key, error = %err, "ledger write failed, restoring");
                previous.truncate(done);
                self.restore(previous).await;
                return Err(err.into());
            }
        }
        tracing::debug!("ledger persisted");
        Ok(())
    }

    async fn restore(&self, previous: Vec<(StorageKey, Option<String>)>) {
        for (key, value) in previous.into_iter().rev() {
            let result = match value {
                Some(text) => self.storage.set(key, text).await,
                None => self.storage.remove(key).await,
            };
            if let Err(err) = result {
                tracing::error!(key = %key, error = %err, "could not restore ledger key");
            }
        }
    }

    fn current_value(team_id: Option<&TeamId>) -> Option<String> {
        team_id.map(|id| id.as_str().to_string())
    }

    async fn write_current(&self, team_id: Option<&TeamId>) -> Result<(), LedgerError> {
        match team_id {
            Some(id) => {
                self.storage
                    .set(StorageKey::CurrentTeam, id.as_str().to_string())
                    .await?;
            }
            None => self.storage.remove(StorageKey::CurrentTeam).await?,
        }
        Ok(())
    }

    /// Reads storage and reconciles the cached user record with the
    /// signed-in identity.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Storage`] if storage cannot be read, holds a
    /// corrupt value, or the reconciled record cannot be written.
    pub async fn load(&mut self) -> Result<IdentitySync, LedgerError> {
        let cached: Option<LocalUser> = self.read_json(StorageKey::User).await?;
        let teams: Vec<Team> = self.read_json(StorageKey::Teams).await?.unwrap_or_default();
        let memberships: Vec<Membership> = self
            .read_json(StorageKey::Memberships)
            .await?
            .unwrap_or_default();
        let current_team = self
            .storage
            .get(StorageKey::CurrentTeam)
            .await?
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
            .map(TeamId::new);

        let (user, sync) = match self.identity.identity() {
            None => (cached, IdentitySync::Unresolved),
            Some(identity) => {
                let fresh = LocalUser {
                    initials: palette::initials(&identity.display_name),
                    id: identity.id,
                    name: identity.display_name,
                };
                if cached.as_ref() == Some(&fresh) {
                    (cached, IdentitySync::InSync)
                } else {
                    self.write_json(StorageKey::User, &fresh).await?;
                    tracing::info!(
                        user_id = %fresh.id,
                        stale = ?cached.as_ref().map(|u| u.id.as_str()),
                        "local identity record replaced"
                    );
                    (Some(fresh), IdentitySync::Replaced)
                }
            }
        };

        self.user = user;
        self.teams = teams;
        self.memberships = memberships;
        self.current_team = current_team;
        tracing::debug!(
            teams = self.teams.len(),
            memberships = self.memberships.len(),
            "ledger loaded"
        );
        Ok(sync)
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    fn allocate(&self) -> Result<(TeamId, String), LedgerError> {
        let mut rng = rand::rng();
        let id = codes::team_id(&mut rng, |id| self.teams.iter().any(|t| &t.id == id))
            .ok_or(LedgerError::CodeSpaceExhausted)?;
        let code = codes::join_code(&mut rng, |code| {
            self.teams.iter().any(|t| t.code.eq_ignore_ascii_case(code))
        })
        .ok_or(LedgerError::CodeSpaceExhausted)?;
        Ok((id, code))
    }

    /// Creates a team owned by the signed-in identity and selects it.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NoIdentity`], [`LedgerError::NameEmpty`],
    /// [`LedgerError::CodeSpaceExhausted`], or a storage error.
    pub async fn create(&mut self, name: &str) -> Result<Team, LedgerError> {
        let caller = self.caller()?;
        let name = name.trim();
        if name.is_empty() {
            return Err(LedgerError::NameEmpty);
        }
        let (id, code) = self.allocate()?;
        let team = Team {
            id,
            name: name.to_string(),
            code,
            created_at: Utc::now(),
            creator_id: Some(caller.id.clone()),
        };

        let mut teams = self.teams.clone();
        teams.insert(0, team.clone());
        let mut memberships = self.memberships.clone();
        memberships.insert(
            0,
            Membership {
                user_id: caller.id,
                team_id: team.id.clone(),
            },
        );
        self.write_all(vec![
            (StorageKey::Memberships, Some(codec::encode_string(&memberships)?)),
            (StorageKey::Teams, Some(codec::encode_string(&teams)?)),
            (StorageKey::CurrentTeam, Self::current_value(Some(&team.id))),
        ])
        .await?;

        self.teams = teams;
        self.memberships = memberships;
        self.current_team = Some(team.id.clone());
        tracing::info!(team_id = %team.id, name = %team.name, "team created");
        Ok(team)
    }

    /// Joins a known team by its code and selects it.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NoIdentity`], [`LedgerError::InvalidCode`]
    /// for a code that is not six characters,
    /// [`LedgerError::CodeNotFound`] if no known team uses it, or a storage
    /// error.
    pub async fn join_by_code(&mut self, input: &str) -> Result<JoinOutcome, LedgerError> {
        let caller = self.caller()?;
        let code = JoinCode::parse(input)?;
        let team = self
            .teams
            .iter()
            .find(|t| code.matches(&t.code))
            .cloned()
            .ok_or_else(|| LedgerError::CodeNotFound(code.to_string()))?;

        if self.has_membership(&caller, &team.id) {
            if self.current_team.as_ref() != Some(&team.id) {
                self.write_current(Some(&team.id)).await?;
                self.current_team = Some(team.id.clone());
            }
            tracing::debug!(team_id = %team.id, "already a member");
            return Ok(JoinOutcome::AlreadyMember(team));
        }

        let mut memberships = self.memberships.clone();
        memberships.push(Membership {
            user_id: caller.id,
            team_id: team.id.clone(),
        });
        self.write_all(vec![
            (StorageKey::Memberships, Some(codec::encode_string(&memberships)?)),
            (StorageKey::CurrentTeam, Self::current_value(Some(&team.id))),
        ])
        .await?;

        self.memberships = memberships;
        self.current_team = Some(team.id.clone());
        tracing::info!(team_id = %team.id, "joined team");
        Ok(JoinOutcome::Joined(team))
    }

    /// Deletes a team and every membership referencing it.
    ///
    /// Only the creator may delete. Teams without a recorded creator follow
    /// the configured [`UnownedDeletePolicy`].
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NoIdentity`], [`LedgerError::TeamNotFound`],
    /// [`LedgerError::NotCreator`], [`LedgerError::UnownedTeam`] or
    /// [`LedgerError::NotMember`] per policy, or a storage error.
    pub async fn delete(&mut self, team_id: &TeamId) -> Result<Team, LedgerError> {
        let caller = self.caller()?;
        let team = self
            .team(team_id)
            .cloned()
            .ok_or_else(|| LedgerError::TeamNotFound(team_id.clone()))?;
        match team.ownership() {
            OwnershipStatus::Owned(creator) if creator == caller.id => {}
            OwnershipStatus::Owned(_) => return Err(LedgerError::NotCreator(team_id.clone())),
            OwnershipStatus::Unowned => match self.policy {
                UnownedDeletePolicy::Deny => {
                    return Err(LedgerError::UnownedTeam(team_id.clone()));
                }
                UnownedDeletePolicy::AnyMember => {
                    if !self.has_membership(&caller, team_id) {
                        return Err(LedgerError::NotMember(team_id.clone()));
                    }
                    tracing::warn!(
                        team_id = %team_id,
                        user_id = %caller.id,
                        "deleting team without a recorded creator"
                    );
                }
            },
        }

        let teams: Vec<Team> = self
            .teams
            .iter()
            .filter(|t| &t.id != team_id)
            .cloned()
            .collect();
        let memberships: Vec<Membership> = self
            .memberships
            .iter()
            .filter(|m| &m.team_id != team_id)
            .cloned()
            .collect();
        let clears_current = self.current_team.as_ref() == Some(team_id);
        let mut writes = vec![
            (StorageKey::Memberships, Some(codec::encode_string(&memberships)?)),
            (StorageKey::Teams, Some(codec::encode_string(&teams)?)),
        ];
        if clears_current {
            writes.push((StorageKey::CurrentTeam, None));
        }
        self.write_all(writes).await?;

        self.teams = teams;
        self.memberships = memberships;
        if clears_current {
            self.current_team = None;
        }
        tracing::info!(team_id = %team_id, "team deleted");
        Ok(team)
    }

    /// Removes the signed-in identity's membership.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NoIdentity`], [`LedgerError::TeamNotFound`],
    /// [`LedgerError::CreatorCannotLeave`], [`LedgerError::NotMember`], or
    /// a storage error.
    pub async fn leave(&mut self, team_id: &TeamId) -> Result<(), LedgerError> {
        let caller = self.caller()?;
        let team = self
            .team(team_id)
            .ok_or_else(|| LedgerError::TeamNotFound(team_id.clone()))?;
        if team.is_creator(&caller.id) {
            return Err(LedgerError::CreatorCannotLeave(team_id.clone()));
        }
        if !self.has_membership(&caller, team_id) {
            return Err(LedgerError::NotMember(team_id.clone()));
        }

        let memberships: Vec<Membership> = self
            .memberships
            .iter()
            .filter(|m| !(m.user_id == caller.id && &m.team_id == team_id))
            .cloned()
            .collect();
        let clears_current = self.current_team.as_ref() == Some(team_id);
        let mut writes = vec![(
            StorageKey::Memberships,
            Some(codec::encode_string(&memberships)?),
        )];
        if clears_current {
            writes.push((StorageKey::CurrentTeam, None));
        }
        self.write_all(writes).await?;

        self.memberships = memberships;
        if clears_current {
            self.current_team = None;
        }
        tracing::info!(team_id = %team_id, "left team");
        Ok(())
    }

    /// Selects a team the signed-in identity belongs to.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NoIdentity`], [`LedgerError::TeamNotFound`],
    /// [`LedgerError::NotMember`], or a storage error.
    pub async fn select_team(&mut self, team_id: &TeamId) -> Result<(), LedgerError> {
        let caller = self.caller()?;
        if self.team(team_id).is_none() {
            return Err(LedgerError::TeamNotFound(team_id.clone()));
        }
        if !self.has_membership(&caller, team_id) {
            return Err(LedgerError::NotMember(team_id.clone()));
        }
        self.write_current(Some(team_id)).await?;
        self.current_team = Some(team_id.clone());
        Ok(())
    }

    /// Removes every persisted key and empties the ledger.
    ///
    /// # Errors
    ///
    /// Returns a storage error; keys removed before the failure stay
    /// removed, the in-memory ledger is untouched.
    pub async fn clear(&mut self) -> Result<(), LedgerError> {
        for key in StorageKey::ALL {
            self.storage.remove(key).await?;
        }
        self.user = None;
        self.teams.clear();
        self.memberships.clear();
        self.current_team = None;
        tracing::info!("local ledger cleared");
        Ok(())
    }
}
