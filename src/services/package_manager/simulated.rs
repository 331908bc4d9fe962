//! In-memory package manager with generations, fault injection and call
//! counters. Backs the CLI demo and the integration tests.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

use super::{
    ChangeKind, ChangeRecord, GenerationId, GenerationMeta, OperationHandle, OperationOutcome,
    PackageManager, PackageMeta, SystemState,
};
use crate::error::CapabilityError;
use crate::planner::types::Op;

/// Injected misbehaviour for one op (optionally one target).
#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    /// The package manager reports failure.
    Fail(String),
    /// The mutation is applied, then the handle closes without a completion.
    Interface(String),
    /// The operation never completes.
    Hang,
}

struct CatalogEntry {
    name: &'static str,
    version: &'static str,
    description: &'static str,
    service: Option<&'static str>,
}

const CATALOG: &[CatalogEntry] = &[
    CatalogEntry { name: "firefox", version: "128.0.3", description: "Mozilla Firefox web browser", service: None },
    CatalogEntry { name: "firefox-esr", version: "115.14.0", description: "Mozilla Firefox web browser, extended support release", service: None },
    CatalogEntry { name: "chromium", version: "127.0.6533", description: "Open source web browser from Google", service: None },
    CatalogEntry { name: "google-chrome", version: "127.0.6533", description: "Freeware web browser developed by Google", service: None },
    CatalogEntry { name: "brave", version: "1.68.1", description: "Privacy-oriented web browser", service: None },
    CatalogEntry { name: "vim", version: "9.1.0", description: "The most popular clone of the VI text editor", service: None },
    CatalogEntry { name: "neovim", version: "0.10.1", description: "Vim text editor fork focused on extensibility", service: None },
    CatalogEntry { name: "emacs", version: "29.4", description: "The extensible, customizable GNU text editor", service: None },
    CatalogEntry { name: "vscode", version: "1.92.0", description: "Code editor developed by Microsoft", service: None },
    CatalogEntry { name: "git", version: "2.45.2", description: "Distributed version control system", service: None },
    CatalogEntry { name: "python3", version: "3.12.4", description: "High-level dynamically-typed programming language", service: None },
    CatalogEntry { name: "nodejs", version: "20.15.1", description: "Event-driven I/O framework for the V8 JavaScript engine", service: None },
    CatalogEntry { name: "docker", version: "27.1.1", description: "Pack, ship and run applications as lightweight containers", service: Some("docker") },
    CatalogEntry { name: "openssh", version: "9.8.1", description: "Implementation of the SSH protocol", service: Some("sshd") },
    CatalogEntry { name: "nginx", version: "1.26.1", description: "Reverse proxy and lightweight web server", service: Some("nginx") },
    CatalogEntry { name: "vlc", version: "3.0.21", description: "Cross-platform media player and streaming server", service: None },
    CatalogEntry { name: "mpv", version: "0.38.0", description: "General-purpose media player", service: None },
    CatalogEntry { name: "spotify", version: "1.2.42", description: "Play music from the Spotify music service", service: None },
    CatalogEntry { name: "thunderbird", version: "128.0.1", description: "Full-featured email client", service: None },
    CatalogEntry { name: "libreoffice", version: "24.2.5", description: "Comprehensive, professional-quality office suite", service: None },
    CatalogEntry { name: "gimp", version: "2.10.38", description: "GNU Image Manipulation Program", service: None },
    CatalogEntry { name: "htop", version: "3.3.0", description: "Interactive process viewer", service: None },
    CatalogEntry { name: "tmux", version: "3.4.0", description: "Terminal multiplexer", service: None },
    CatalogEntry { name: "curl", version: "8.8.0", description: "Command line tool for transferring files with URL syntax", service: None },
    CatalogEntry { name: "wget", version: "1.24.5", description: "Tool for retrieving files using HTTP, HTTPS, and FTP", service: None },
    CatalogEntry { name: "ripgrep", version: "14.1.0", description: "Line-oriented search tool that recursively searches directories", service: None },
    CatalogEntry { name: "alacritty", version: "0.13.2", description: "Cross-platform, GPU-accelerated terminal emulator", service: None },
    CatalogEntry { name: "kitty", version: "0.35.2", description: "Modern, hackable, featureful, OpenGL based terminal emulator", service: None },
    CatalogEntry { name: "zsh", version: "5.9.0", description: "The Z shell", service: None },
    CatalogEntry { name: "fish", version: "3.7.1", description: "Smart and user-friendly command line shell", service: None },
    CatalogEntry { name: "networkmanager", version: "1.48.4", description: "Network configuration and management tool", service: Some("NetworkManager") },
    CatalogEntry { name: "systemd", version: "256.2.0", description: "System and service manager for Linux", service: Some("systemd-resolved") },
    CatalogEntry { name: "nix", version: "2.18.5", description: "Purely functional package manager", service: Some("nix-daemon") },
    CatalogEntry { name: "glibc", version: "2.39.0", description: "The GNU C Library", service: None },
    CatalogEntry { name: "bash", version: "5.2.26", description: "GNU Bourne-Again Shell", service: None },
    CatalogEntry { name: "coreutils", version: "9.5.0", description: "The GNU Core Utilities", service: None },
];

/// Generation 1 holds the base system; generation 2 adds the user tools.
const BASE_SYSTEM: &[&str] = &["bash", "coreutils", "glibc", "nix", "systemd", "networkmanager", "openssh"];
const USER_TOOLS: &[&str] = &["git", "vim"];

#[derive(Debug, Clone)]
struct GenerationRecord {
    id: GenerationId,
    created_at: chrono::DateTime<Utc>,
    description: String,
    packages: BTreeMap<String, String>,
}

#[derive(Debug)]
struct SimState {
    generations: Vec<GenerationRecord>,
    current: GenerationId,
}

impl SimState {
    fn seeded() -> Self {
        let mut state = Self {
            generations: Vec::new(),
            current: 0,
        };
        let base: BTreeMap<String, String> = BASE_SYSTEM
            .iter()
            .filter_map(|name| catalog_entry(name))
            .map(|e| (e.name.to_string(), e.version.to_string()))
            .collect();
        state.commit(base.clone(), "initial system".to_string());
        let mut with_tools = base;
        for entry in USER_TOOLS.iter().filter_map(|name| catalog_entry(name)) {
            with_tools.insert(entry.name.to_string(), entry.version.to_string());
        }
        state.commit(with_tools, "install git, vim".to_string());
        state
    }

    fn generation(&self, id: GenerationId) -> Option<&GenerationRecord> {
        self.generations.iter().find(|g| g.id == id)
    }

    fn packages(&self) -> BTreeMap<String, String> {
        self.generation(self.current)
            .map(|g| g.packages.clone())
            .unwrap_or_default()
    }

    fn commit(&mut self, packages: BTreeMap<String, String>, description: String) -> GenerationId {
        let id = self.generations.iter().map(|g| g.id).max().unwrap_or(0) + 1;
        self.generations.push(GenerationRecord {
            id,
            created_at: Utc::now(),
            description,
            packages,
        });
        self.current = id;
        id
    }

    fn install(&mut self, package: &str) -> Result<GenerationId, CapabilityError> {
        let entry = catalog_entry(package)
            .ok_or_else(|| CapabilityError::Operation(format!("attribute '{}' not found", package)))?;
        let mut packages = self.packages();
        if packages.contains_key(package) {
            return Ok(self.current);
        }
        packages.insert(entry.name.to_string(), entry.version.to_string());
        Ok(self.commit(packages, format!("install {}", package)))
    }

    fn remove(&mut self, package: &str) -> Result<GenerationId, CapabilityError> {
        let mut packages = self.packages();
        if packages.remove(package).is_none() {
            return Err(CapabilityError::Operation(format!("{} is not installed", package)));
        }
        Ok(self.commit(packages, format!("remove {}", package)))
    }

    fn update(&mut self, targets: Option<Vec<String>>) -> Result<GenerationId, CapabilityError> {
        let mut packages = self.packages();
        let names: Vec<String> = match targets {
            Some(targets) => {
                if let Some(missing) = targets.iter().find(|t| !packages.contains_key(t.as_str())) {
                    return Err(CapabilityError::Operation(format!("{} is not installed", missing)));
                }
                targets
            }
            None => packages.keys().cloned().collect(),
        };
        for name in &names {
            if let Some(version) = packages.get_mut(name) {
                *version = bump(version);
            }
        }
        let description = if names.len() == packages.len() {
            "system update".to_string()
        } else {
            format!("update {}", names.join(", "))
        };
        Ok(self.commit(packages, description))
    }

    fn switch_to(&mut self, generation: GenerationId) -> Result<GenerationId, CapabilityError> {
        if self.generation(generation).is_none() {
            return Err(CapabilityError::UnknownGeneration(generation));
        }
        self.current = generation;
        Ok(generation)
    }

    fn previous(&self) -> Option<GenerationId> {
        self.generations
            .iter()
            .map(|g| g.id)
            .filter(|id| *id < self.current)
            .max()
    }
}

fn catalog_entry(name: &str) -> Option<&'static CatalogEntry> {
    CATALOG.iter().find(|e| e.name == name)
}

/// "1.2.3" -> "1.2.4"; non-numeric tails get ".1" appended.
fn bump(version: &str) -> String {
    match version.rsplit_once('.') {
        Some((head, tail)) => match tail.parse::<u64>() {
            Ok(n) => format!("{}.{}", head, n + 1),
            Err(_) => format!("{}.1", version),
        },
        None => format!("{}.1", version),
    }
}

#[derive(Debug, Default)]
struct CallCounters {
    by_op: Mutex<HashMap<Op, usize>>,
    snapshots: AtomicUsize,
}

impl CallCounters {
    fn bump(&self, op: Op) {
        let mut by_op = self.by_op.lock().unwrap_or_else(|e| e.into_inner());
        *by_op.entry(op).or_insert(0) += 1;
    }

    fn get(&self, op: Op) -> usize {
        let by_op = self.by_op.lock().unwrap_or_else(|e| e.into_inner());
        by_op.get(&op).copied().unwrap_or(0)
    }
}

pub struct SimulatedPackageManager {
    state: Arc<Mutex<SimState>>,
    faults: Mutex<HashMap<(Op, Option<String>), Fault>>,
    calls: CallCounters,
    latency: Duration,
}

impl Default for SimulatedPackageManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedPackageManager {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::seeded())),
            faults: Mutex::new(HashMap::new()),
            calls: CallCounters::default(),
            latency: Duration::ZERO,
        }
    }

    /// Every mutating operation sleeps this long before applying.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// `target: None` applies to every call of `op`.
    pub fn inject_fault(&self, op: Op, target: Option<&str>, fault: Fault) {
        let mut faults = self.faults.lock().unwrap_or_else(|e| e.into_inner());
        faults.insert((op, target.map(str::to_string)), fault);
    }

    pub fn clear_faults(&self) {
        self.faults.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn calls(&self, op: Op) -> usize {
        self.calls.get(op)
    }

    /// Calls to install/remove/update/rollback.
    pub fn mutation_calls(&self) -> usize {
        Op::ALL
            .iter()
            .filter(|op| op.is_mutating())
            .map(|op| self.calls(*op))
            .sum()
    }

    pub fn snapshot_calls(&self) -> usize {
        self.calls.snapshots.load(Ordering::SeqCst)
    }

    pub fn current_generation(&self) -> GenerationId {
        self.lock_state().current
    }

    pub fn generation_count(&self) -> usize {
        self.lock_state().generations.len()
    }

    pub fn is_installed(&self, package: &str) -> bool {
        self.lock_state().packages().contains_key(package)
    }

    pub fn version_of(&self, package: &str) -> Option<String> {
        self.lock_state().packages().get(package).cloned()
    }

    fn lock_state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn fault_for(&self, op: Op, target: Option<&str>) -> Option<Fault> {
        let faults = self.faults.lock().unwrap_or_else(|e| e.into_inner());
        target
            .and_then(|t| faults.get(&(op, Some(t.to_string()))))
            .or_else(|| faults.get(&(op, None)))
            .cloned()
    }

    /// Runs `apply` on a background task, reporting through the handle.
    fn spawn_mutation<F>(&self, op: Op, label: String, fault: Option<Fault>, apply: F) -> OperationHandle
    where
        F: FnOnce(&mut SimState) -> Result<GenerationId, CapabilityError> + Send + 'static,
    {
        let (reporter, handle) = OperationHandle::channel(8);
        let state = Arc::clone(&self.state);
        let latency = self.latency;

        tokio::spawn(async move {
            reporter.progress(Some(0.0), format!("starting {}", label)).await;
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }

            if let Some(Fault::Fail(message)) = &fault {
                debug!(%op, "Injected operation failure");
                reporter.finish(Err(CapabilityError::Operation(message.clone()))).await;
                return;
            }
            if let Some(Fault::Hang) = &fault {
                debug!(%op, "Injected hang");
                std::future::pending::<()>().await;
            }

            let result = {
                let mut guard = state.lock().unwrap_or_else(|e| e.into_inner());
                apply(&mut guard)
            };

            if let Some(Fault::Interface(message)) = fault {
                debug!(%op, "Injected interface failure");
                reporter.progress(Some(50.0), message).await;
                // Dropping the reporter closes the handle without a completion.
                return;
            }

            reporter.progress(Some(100.0), format!("finished {}", label)).await;
            reporter
                .finish(result.map(|generation| OperationOutcome {
                    generation: Some(generation),
                }))
                .await;
        });

        handle
    }
}

#[async_trait]
impl PackageManager for SimulatedPackageManager {
    async fn install(&self, package: &str) -> Result<OperationHandle, CapabilityError> {
        self.calls.bump(Op::Install);
        let fault = self.fault_for(Op::Install, Some(package));
        let target = package.to_string();
        info!(package, "Simulated install");
        Ok(self.spawn_mutation(Op::Install, format!("install {}", package), fault, move |state| {
            state.install(&target)
        }))
    }

    async fn remove(&self, package: &str) -> Result<OperationHandle, CapabilityError> {
        self.calls.bump(Op::Remove);
        let fault = self.fault_for(Op::Remove, Some(package));
        let target = package.to_string();
        info!(package, "Simulated remove");
        Ok(self.spawn_mutation(Op::Remove, format!("remove {}", package), fault, move |state| {
            state.remove(&target)
        }))
    }

    async fn update(&self, packages: Option<&[String]>) -> Result<OperationHandle, CapabilityError> {
        self.calls.bump(Op::Update);
        let targets = packages.map(|p| p.to_vec());
        let fault = match &targets {
            Some(t) if t.len() == 1 => self.fault_for(Op::Update, Some(&t[0])),
            _ => self.fault_for(Op::Update, None),
        };
        let label = match &targets {
            Some(t) => format!("update {}", t.join(", ")),
            None => "system update".to_string(),
        };
        info!(%label, "Simulated update");
        Ok(self.spawn_mutation(Op::Update, label, fault, move |state| state.update(targets)))
    }

    async fn rollback(&self, generation: GenerationId) -> Result<OperationHandle, CapabilityError> {
        self.calls.bump(Op::Rollback);
        if self.lock_state().generation(generation).is_none() {
            return Err(CapabilityError::UnknownGeneration(generation));
        }
        let fault = self.fault_for(Op::Rollback, Some(&generation.to_string()));
        info!(generation, "Simulated rollback");
        Ok(self.spawn_mutation(
            Op::Rollback,
            format!("switch to generation {}", generation),
            fault,
            move |state| state.switch_to(generation),
        ))
    }

    async fn list_generations(&self) -> Result<Vec<GenerationMeta>, CapabilityError> {
        self.calls.bump(Op::ListGenerations);
        if let Some(fault) = self.fault_for(Op::ListGenerations, None) {
            return Err(fault_error(fault));
        }
        let state = self.lock_state();
        Ok(state
            .generations
            .iter()
            .map(|g| GenerationMeta {
                id: g.id,
                created_at: g.created_at,
                current: g.id == state.current,
                description: g.description.clone(),
            })
            .collect())
    }

    async fn diff(&self, from: GenerationId, to: GenerationId) -> Result<Vec<ChangeRecord>, CapabilityError> {
        self.calls.bump(Op::Diff);
        if let Some(fault) = self.fault_for(Op::Diff, None) {
            return Err(fault_error(fault));
        }
        let state = self.lock_state();
        let old = state
            .generation(from)
            .ok_or(CapabilityError::UnknownGeneration(from))?;
        let new = state
            .generation(to)
            .ok_or(CapabilityError::UnknownGeneration(to))?;

        let names: BTreeSet<&String> = old.packages.keys().chain(new.packages.keys()).collect();
        Ok(names
            .into_iter()
            .filter_map(|name| {
                let before = old.packages.get(name);
                let after = new.packages.get(name);
                let change = match (before, after) {
                    (None, Some(_)) => ChangeKind::Added,
                    (Some(_), None) => ChangeKind::Removed,
                    (Some(a), Some(b)) if a != b => ChangeKind::Upgraded,
                    _ => return None,
                };
                Some(ChangeRecord {
                    package: name.clone(),
                    change,
                    from_version: before.cloned(),
                    to_version: after.cloned(),
                })
            })
            .collect())
    }

    async fn search(&self, query: &str) -> Result<Vec<PackageMeta>, CapabilityError> {
        self.calls.bump(Op::Search);
        if let Some(fault) = self.fault_for(Op::Search, None) {
            return Err(fault_error(fault));
        }
        let words: Vec<String> = query
            .split_whitespace()
            .map(|w| w.to_lowercase())
            .collect();
        let mut hits: Vec<PackageMeta> = CATALOG
            .iter()
            .filter(|entry| {
                let haystack = format!("{} {}", entry.name, entry.description).to_lowercase();
                !words.is_empty() && words.iter().all(|w| haystack.contains(w.as_str()))
            })
            .map(|entry| PackageMeta {
                name: entry.name.to_string(),
                version: entry.version.to_string(),
                description: entry.description.to_string(),
            })
            .collect();
        // Exact name first, then alphabetical.
        hits.sort_by(|a, b| {
            let exact = |p: &PackageMeta| p.name != query;
            exact(a).cmp(&exact(b)).then_with(|| a.name.cmp(&b.name))
        });
        Ok(hits)
    }

    async fn snapshot(&self) -> Result<SystemState, CapabilityError> {
        self.calls.snapshots.fetch_add(1, Ordering::SeqCst);
        let state = self.lock_state();
        let packages = state.packages();
        let running_services = packages
            .keys()
            .filter_map(|name| catalog_entry(name))
            .filter_map(|entry| entry.service.map(|svc| (svc.to_string(), entry.name.to_string())))
            .collect();
        Ok(SystemState {
            current_generation: Some(state.current),
            previous_generation: state.previous(),
            installed: packages.keys().cloned().collect(),
            running_services,
        })
    }
}

fn fault_error(fault: Fault) -> CapabilityError {
    match fault {
        Fault::Fail(message) => CapabilityError::Operation(message),
        Fault::Interface(message) => CapabilityError::Interface(message),
        Fault::Hang => CapabilityError::Interface("query did not respond".to_string()),
    }
}
