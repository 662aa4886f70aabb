use core::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use mk_meta::Value;
use parking_lot::Mutex;

use crate::binding::{Binding, BindingCore, BindingPolicy, BindingState};
use crate::error::Result;
use crate::id::BindingId;

/// Verdict of a [`Normalizer`] on a detected binding loop.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizeOutcome {
    /// Write this value instead and carry on.
    Normalized(Value),
    /// Abandon the write silently.
    FailAndExit,
    /// Report [`crate::Error::BindingLoop`].
    Throw,
}

/// Resolves loops among the bindings of a group.
pub trait Normalizer: Send + Sync {
    /// Called when `binding` is re-entered while writing; `loop_count` is the
    /// number of nested evaluations of `binding` on this thread.
    fn try_normalize(&self, binding: &Binding, value: Value, loop_count: usize) -> NormalizeOutcome;
}

impl<F> Normalizer for F
where
    F: Fn(&Binding, Value, usize) -> NormalizeOutcome + Send + Sync,
{
    fn try_normalize(&self, binding: &Binding, value: Value, loop_count: usize) -> NormalizeOutcome {
        self(binding, value, loop_count)
    }
}

struct GroupNormalizer {
    normalizer: Arc<dyn Normalizer>,
    member: Option<BindingId>,
}

pub(crate) struct GroupCore {
    name: String,
    members: Mutex<Vec<Weak<BindingCore>>>,
    enabled: AtomicBool,
    policy: Mutex<BindingPolicy>,
    normalizer: Mutex<Option<GroupNormalizer>>,
    detaching: AtomicBool,
}

impl GroupCore {
    fn members(&self) -> Vec<Arc<BindingCore>> {
        let mut members = self.members.lock();
        members.retain(|member| member.strong_count() > 0);
        members.iter().filter_map(Weak::upgrade).collect()
    }

    /// Normalizer applying to loops detected on `binding`.
    pub(crate) fn normalizer_for(&self, binding: BindingId) -> Option<Arc<dyn Normalizer>> {
        self.normalizer
            .lock()
            .as_ref()
            .filter(|entry| entry.member.map_or(true, |member| member == binding))
            .map(|entry| Arc::clone(&entry.normalizer))
    }

    /// Detaches every attached member once; re-entrant calls from the
    /// members' own detach are no-ops.
    pub(crate) fn detach_members(&self) -> Result<()> {
        if self.detaching.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut outcome = Ok(());
        for member in self.members() {
            if member.state() == BindingState::Attached {
                if let Err(err) = member.detach() {
                    if outcome.is_ok() {
                        outcome = Err(err);
                    }
                }
            }
        }
        self.detaching.store(false, Ordering::Release);
        outcome
    }
}

/// Bindings sharing enable state, policy and loop normalisation.
#[derive(Clone)]
pub struct BindingGroup {
    core: Arc<GroupCore>,
}

impl BindingGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            core: Arc::new(GroupCore {
                name: name.into(),
                members: Mutex::new(Vec::new()),
                enabled: AtomicBool::new(true),
                policy: Mutex::new(BindingPolicy::default()),
                normalizer: Mutex::new(None),
                detaching: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn from_core(core: Arc<GroupCore>) -> Self {
        Self { core }
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Adds `binding`, applying the group's policy and enable state.
    pub fn add(&self, binding: &Binding) {
        let core = binding.core();
        *core.group.lock() = Some(Arc::clone(&self.core));
        core.set_policy(self.policy());
        core.suspended
            .store(!self.is_enabled(), Ordering::Release);
        self.core.members.lock().push(Arc::downgrade(core));
    }

    pub fn remove(&self, binding: &Binding) {
        let core = binding.core();
        let mut group = core.group.lock();
        if group
            .as_ref()
            .is_some_and(|group| Arc::ptr_eq(group, &self.core))
        {
            *group = None;
        }
        drop(group);
        self.core
            .members
            .lock()
            .retain(|member| member.upgrade().is_some_and(|member| member.id() != core.id()));
    }

    pub fn members(&self) -> Vec<Binding> {
        self.core.members().into_iter().map(Binding::from_core).collect()
    }

    pub fn len(&self) -> usize {
        self.core.members().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_enabled(&self) -> bool {
        self.core.enabled.load(Ordering::Acquire)
    }

    /// Enables or suspends every member.
    pub fn set_enabled(&self, enabled: bool) -> Result<()> {
        self.core.enabled.store(enabled, Ordering::Release);
        for member in self.members() {
            member.set_enabled(enabled)?;
        }
        Ok(())
    }

    pub fn policy(&self) -> BindingPolicy {
        *self.core.policy.lock()
    }

    pub fn set_policy(&self, policy: BindingPolicy) {
        *self.core.policy.lock() = policy;
        for member in self.core.members() {
            member.set_policy(policy);
        }
    }

    /// Installs a normalizer for loops on any member.
    pub fn set_normalizer(&self, normalizer: impl Normalizer + 'static) {
        *self.core.normalizer.lock() = Some(GroupNormalizer {
            normalizer: Arc::new(normalizer),
            member: None,
        });
    }

    /// Installs a normalizer for loops detected on `member` only; loops on
    /// other members are reported as errors.
    pub fn set_member_normalizer(&self, member: &Binding, normalizer: impl Normalizer + 'static) {
        *self.core.normalizer.lock() = Some(GroupNormalizer {
            normalizer: Arc::new(normalizer),
            member: Some(member.id()),
        });
    }

    pub fn clear_normalizer(&self) {
        self.core.normalizer.lock().take();
    }

    /// Detaches every member.
    pub fn discard(&self) -> Result<()> {
        log::debug!("discarding binding group {}", self.core.name);
        self.core.detach_members()
    }
}

impl fmt::Debug for BindingGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingGroup")
            .field("name", &self.core.name)
            .field("members", &self.len())
            .field("enabled", &self.is_enabled())
            .field("policy", &self.policy())
            .finish()
    }
}
