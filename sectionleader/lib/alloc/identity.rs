use std::collections::HashMap;

use rand::Rng;

use crate::{vm::MachineId, LeaderError, LeaderResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Extra attempts made after the first candidate collides.
pub const MAX_NAME_RETRIES: usize = 10;

const ADJECTIVES: &[&str] = &[
    "able", "amused", "apt", "bold", "brave", "bright", "calm", "clever", "cosmic", "crisp",
    "daring", "eager", "fair", "fancy", "fast", "fine", "fond", "frank", "gentle", "glad",
    "golden", "grand", "happy", "hardy", "honest", "humble", "jolly", "keen", "kind", "lively",
    "loyal", "lucky", "mellow", "merry", "mighty", "modest", "neat", "nimble", "noble", "polite",
    "proud", "quick", "quiet", "rapid", "ready", "regal", "sharp", "shiny", "smart", "snappy",
    "solid", "steady", "sunny", "swift", "tidy", "trusty", "vivid", "warm", "wise", "witty",
];

const NOUNS: &[&str] = &[
    "badger", "beagle", "bison", "bobcat", "cheetah", "condor", "coyote", "crane", "dingo",
    "dolphin", "eagle", "falcon", "ferret", "finch", "fox", "gazelle", "gecko", "gopher", "heron",
    "ibex", "impala", "jaguar", "koala", "lemur", "lynx", "macaw", "marmot", "mole", "moose",
    "newt", "ocelot", "orca", "osprey", "otter", "owl", "panda", "parrot", "pelican", "puffin",
    "quail", "rabbit", "raven", "salmon", "seal", "shrew", "skunk", "sloth", "sparrow", "stoat",
    "swan", "tapir", "tiger", "toucan", "turtle", "viper", "walrus", "weasel", "wombat", "yak",
    "zebra",
];

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Produces display name candidates.
pub trait NameGenerator: Send + Sync {
    /// Returns the next candidate. Candidates may repeat.
    fn generate(&mut self) -> String;
}

/// Generates `adjective-animal` names.
#[derive(Debug, Default, Clone, Copy)]
pub struct PetnameGenerator;

/// A two-way map between machine ids and display names.
///
/// Both directions are updated together, so a name is never visible in one map but not the
/// other.
pub struct NameRegistry {
    id_to_name: HashMap<MachineId, String>,
    name_to_id: HashMap<String, MachineId>,
    generator: Box<dyn NameGenerator>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl NameRegistry {
    /// Creates an empty registry generating pet names.
    pub fn new() -> Self {
        Self::with_generator(PetnameGenerator)
    }

    /// Creates an empty registry with a custom candidate generator.
    pub fn with_generator(generator: impl NameGenerator + 'static) -> Self {
        Self {
            id_to_name: HashMap::new(),
            name_to_id: HashMap::new(),
            generator: Box::new(generator),
        }
    }

    /// Assigns `id` a name no other machine holds.
    ///
    /// Tries one candidate plus up to [`MAX_NAME_RETRIES`] more, then gives up with
    /// `NameGenerationExhausted`. Any name `id` held before is replaced.
    pub fn generate_new_name(&mut self, id: MachineId) -> LeaderResult<String> {
        let attempts = 1 + MAX_NAME_RETRIES;
        for attempt in 0..attempts {
            let candidate = self.generator.generate();
            if self.name_to_id.contains_key(&candidate) {
                tracing::debug!(%id, %candidate, attempt, "name collision");
                continue;
            }

            self.release(&id);
            self.id_to_name.insert(id, candidate.clone());
            self.name_to_id.insert(candidate.clone(), id);
            return Ok(candidate);
        }

        Err(LeaderError::NameGenerationExhausted { attempts })
    }

    /// Looks up the name of `id`.
    pub fn get_name(&self, id: &MachineId) -> LeaderResult<String> {
        self.id_to_name
            .get(id)
            .cloned()
            .ok_or_else(|| LeaderError::NotFound(format!("machine {id}")))
    }

    /// Looks up the machine called `name`.
    pub fn get_id(&self, name: &str) -> LeaderResult<MachineId> {
        self.name_to_id
            .get(name)
            .copied()
            .ok_or_else(|| LeaderError::NotFound(format!("machine named {name}")))
    }

    /// Frees the name held by `id`, returning it.
    pub fn release(&mut self, id: &MachineId) -> Option<String> {
        let name = self.id_to_name.remove(id)?;
        self.name_to_id.remove(&name);
        Some(name)
    }

    /// Number of names in use.
    pub fn len(&self) -> usize {
        self.id_to_name.len()
    }

    /// Returns `true` if no names are in use.
    pub fn is_empty(&self) -> bool {
        self.id_to_name.is_empty()
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl NameGenerator for PetnameGenerator {
    fn generate(&mut self) -> String {
        let mut rng = rand::rng();
        let adjective = ADJECTIVES[rng.random_range(0..ADJECTIVES.len())];
        let noun = NOUNS[rng.random_range(0..NOUNS.len())];
        format!("{adjective}-{noun}")
    }
}

impl<F> NameGenerator for F
where
    F: FnMut() -> String + Send + Sync,
{
    fn generate(&mut self) -> String {
        self()
    }
}

impl Default for NameRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for NameRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NameRegistry")
            .field("id_to_name", &self.id_to_name)
            .finish_non_exhaustive()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
