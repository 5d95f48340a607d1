//! ---
//! vms_section: "03-dispatch-runtime"
//! vms_subsection: "module"
//! vms_type: "source"
//! vms_scope: "code"
//! vms_description: "Offering table and layer availability fixpoint."
//! vms_version: "v0.0.0-prealpha"
//! vms_owner: "tbd"
//! ---
use tracing::debug;
use vms_msg::{AvailableLayers, Offering};

/// Compute the layers reachable from `offerings`.
///
/// A layer is available when at least one of its offerings has every
/// dependency available. Layers offered without dependencies seed the set in
/// table order, then passes over the table add newly satisfied layers until a
/// pass adds nothing. Dependencies that nobody offers are never satisfied.
pub fn resolve(offerings: &[Offering]) -> AvailableLayers {
    let mut available: AvailableLayers = offerings
        .iter()
        .filter(|offering| offering.is_unconditional())
        .map(|offering| offering.layer)
        .collect();

    loop {
        let mut grew = false;
        for offering in offerings {
            if available.contains(&offering.layer) {
                continue;
            }
            if offering
                .dependencies
                .iter()
                .all(|dependency| available.contains(dependency))
            {
                available.insert(offering.layer);
                grew = true;
            }
        }
        if !grew {
            break;
        }
    }
    available
}

/// Current offering table and the availability derived from it.
#[derive(Debug, Default, Clone)]
pub struct AvailabilityResolver {
    offerings: Vec<Offering>,
    available: AvailableLayers,
}

impl AvailabilityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole table. Returns the new availability set only when it
    /// differs, as a set, from the previous one.
    pub fn replace_offerings(&mut self, offerings: Vec<Offering>) -> Option<AvailableLayers> {
        self.offerings = offerings;
        let next = self.recompute_availability();
        debug!(
            offerings = self.offerings.len(),
            available = next.len(),
            "offering table replaced"
        );
        if next == self.available {
            return None;
        }
        self.available = next;
        Some(self.available.clone())
    }

    /// Evaluate the current table from scratch.
    pub fn recompute_availability(&self) -> AvailableLayers {
        resolve(&self.offerings)
    }

    pub fn available(&self) -> &AvailableLayers {
        &self.available
    }

    pub fn offerings(&self) -> &[Offering] {
        &self.offerings
    }

    pub fn offering_count(&self) -> usize {
        self.offerings.len()
    }
}
