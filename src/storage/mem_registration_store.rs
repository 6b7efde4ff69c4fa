use dashmap::DashMap;

use super::RegistrationStore;
use crate::RegistrationMemento;
use crate::Result;

#[derive(Debug, Default)]
pub struct MemRegistrationStore {
    mementos: DashMap<u64, RegistrationMemento>,
}

impl MemRegistrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(
        &self,
        id: u64,
    ) -> Option<RegistrationMemento> {
        self.mementos.get(&id).map(|m| m.value().clone())
    }

    pub fn len(&self) -> usize {
        self.mementos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mementos.is_empty()
    }
}

impl RegistrationStore for MemRegistrationStore {
    fn save(
        &self,
        memento: &RegistrationMemento,
    ) -> Result<()> {
        self.mementos
            .entry(memento.id)
            .and_modify(|stored| {
                let seq = stored.seq.max(memento.seq);
                *stored = memento.clone();
                stored.seq = seq;
            })
            .or_insert_with(|| memento.clone());
        Ok(())
    }

    fn save_sequence(
        &self,
        id: u64,
        seq: u64,
    ) -> Result<()> {
        if let Some(mut memento) = self.mementos.get_mut(&id) {
            memento.seq = memento.seq.max(seq);
        }
        Ok(())
    }

    fn remove(
        &self,
        id: u64,
    ) -> Result<()> {
        self.mementos.remove(&id);
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<RegistrationMemento>> {
        let mut all: Vec<_> = self.mementos.iter().map(|m| m.value().clone()).collect();
        all.sort_by_key(|m| m.id);
        Ok(all)
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}
