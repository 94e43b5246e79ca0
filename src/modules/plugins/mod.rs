//! Compiled-in capability modules.  Each sits behind its own
//! `plugin-*` feature and is added to the catalog by [`register_builtin`].

#[cfg(feature = "plugin-checkin")]
pub mod checkin;
#[cfg(feature = "plugin-journal")]
pub mod journal;
#[cfg(feature = "plugin-memory")]
pub mod memory;
#[cfg(feature = "plugin-tasks")]
pub mod tasks;

use super::ModuleCatalog;

#[allow(unused_variables)]
pub fn register_builtin(catalog: &mut ModuleCatalog) {
    #[cfg(feature = "plugin-memory")]
    catalog.register(memory::NAME, |s| Box::new(memory::MemoryModule::new(s.memory.clone())));

    #[cfg(feature = "plugin-tasks")]
    catalog.register(tasks::NAME, |s| Box::new(tasks::TasksModule::new(s.tasks.clone())));

    #[cfg(feature = "plugin-checkin")]
    catalog.register(checkin::NAME, |s| Box::new(checkin::CheckinModule::new(s.tasks.clone())));

    #[cfg(feature = "plugin-journal")]
    catalog.register(journal::NAME, |s| Box::new(journal::JournalModule::new(s.memory.clone())));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_matches_features() {
        let catalog = ModuleCatalog::builtin();
        assert_eq!(catalog.contains("memory"), cfg!(feature = "plugin-memory"));
        assert_eq!(catalog.contains("tasks"), cfg!(feature = "plugin-tasks"));
        assert_eq!(catalog.contains("checkin"), cfg!(feature = "plugin-checkin"));
        assert_eq!(catalog.contains("journal"), cfg!(feature = "plugin-journal"));
    }
}
