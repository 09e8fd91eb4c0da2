//! Named storage for the data a fit reads and the curves it writes.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::error::{FitError, Result};

/// One spectrum: x values with observations and their uncertainties.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Spectrum {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub e: Vec<f64>,
}

impl Spectrum {
    /// Fails with `DimensionMismatch` if the arrays differ in length.
    pub fn new(x: Vec<f64>, y: Vec<f64>, e: Vec<f64>) -> Result<Self> {
        if x.len() != y.len() || y.len() != e.len() {
            return Err(FitError::DimensionMismatch(format!(
                "spectrum arrays differ in length: {}, {}, {}",
                x.len(),
                y.len(),
                e.len()
            )));
        }
        Ok(Self { x, y, e })
    }

    /// A spectrum with unit uncertainties.
    pub fn unweighted(x: Vec<f64>, y: Vec<f64>) -> Result<Self> {
        let e = vec![1.0; y.len()];
        Self::new(x, y, e)
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
}

/// An ordered set of labelled spectra.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Workspace {
    spectra: Vec<(String, Spectrum)>,
}

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// A workspace holding a single unlabelled spectrum.
    pub fn from_spectrum(spectrum: Spectrum) -> Self {
        let mut workspace = Self::new();
        workspace.push("", spectrum);
        workspace
    }

    pub fn push(&mut self, label: &str, spectrum: Spectrum) {
        self.spectra.push((label.to_string(), spectrum));
    }

    pub fn n_spectra(&self) -> usize {
        self.spectra.len()
    }

    pub fn spectrum(&self, index: usize) -> Result<&Spectrum> {
        self.spectra.get(index).map(|(_, s)| s).ok_or_else(|| {
            FitError::InvalidInput(format!(
                "workspace index {} out of range ({} spectra)",
                index,
                self.spectra.len()
            ))
        })
    }

    pub fn spectrum_by_label(&self, label: &str) -> Option<&Spectrum> {
        self.spectra
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, s)| s)
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.spectra.iter().map(|(l, _)| l.as_str())
    }
}

/// Name-keyed access to workspaces.
///
/// Fits only retrieve inputs and store outputs by name, so independent fits
/// may share one service across threads.
pub trait DataService: Send + Sync {
    /// Fails with `WorkspaceNotFound` for an unknown name.
    fn retrieve(&self, name: &str) -> Result<Arc<Workspace>>;

    /// Store a workspace, replacing any workspace of the same name.
    fn store(&self, name: &str, workspace: Workspace) -> Result<()>;

    fn contains(&self, name: &str) -> bool {
        self.retrieve(name).is_ok()
    }
}

/// A [`DataService`] keeping everything in memory.
#[derive(Debug, Default)]
pub struct InMemoryDataService {
    workspaces: RwLock<BTreeMap<String, Arc<Workspace>>>,
}

impl InMemoryDataService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn names(&self) -> Vec<String> {
        self.workspaces
            .read()
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default()
    }
}

fn poisoned() -> FitError {
    FitError::InvalidInput("data service lock poisoned".to_string())
}

impl DataService for InMemoryDataService {
    fn retrieve(&self, name: &str) -> Result<Arc<Workspace>> {
        self.workspaces
            .read()
            .map_err(|_| poisoned())?
            .get(name)
            .cloned()
            .ok_or_else(|| FitError::WorkspaceNotFound(name.to_string()))
    }

    fn store(&self, name: &str, workspace: Workspace) -> Result<()> {
        self.workspaces
            .write()
            .map_err(|_| poisoned())?
            .insert(name.to_string(), Arc::new(workspace));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_and_retrieve() {
        let service = InMemoryDataService::new();
        let spectrum = Spectrum::unweighted(vec![0.0, 1.0], vec![2.0, 3.0]).unwrap();
        service
            .store("ws", Workspace::from_spectrum(spectrum.clone()))
            .unwrap();

        assert!(service.contains("ws"));
        assert_eq!(service.retrieve("ws").unwrap().spectrum(0).unwrap(), &spectrum);
        assert!(service.retrieve("ws").unwrap().spectrum(1).is_err());
        assert!(matches!(
            service.retrieve("other"),
            Err(FitError::WorkspaceNotFound(_))
        ));
        assert_eq!(service.names(), vec!["ws".to_string()]);
    }

    #[test]
    fn test_mismatched_spectrum() {
        assert!(Spectrum::new(vec![0.0], vec![], vec![]).is_err());
    }
}
