//! Lazy query results.

use crate::collection::CollectionState;
use crate::error::CoreResult;
use crate::object::ObjectRef;
use crate::query::parser;
use crate::query::predicate::BoundComparison;
use crate::schema::CompiledSchema;
use crate::types::{CollectionId, ObjectId};
use crate::value::Value;
use crate::view::View;
use std::fmt;
use std::sync::Arc;

/// The objects of one type in one view that satisfy a predicate.
///
/// Results hold no objects. Every access evaluates the predicate against
/// the view, so the same `Results` can be iterated repeatedly while the
/// view is live. Objects come back in ascending id order, which is
/// creation order.
#[derive(Clone)]
pub struct Results {
    view: View,
    schema: Arc<CompiledSchema>,
    collection: CollectionId,
    predicates: Vec<BoundComparison>,
}

impl Results {
    pub(crate) fn new(view: View, schema: Arc<CompiledSchema>, collection: CollectionId) -> Self {
        Self {
            view,
            schema,
            collection,
            predicates: Vec::new(),
        }
    }

    /// Name of the type the results range over.
    #[must_use]
    pub fn type_name(&self) -> &str {
        self.schema.layout(self.collection).name()
    }

    /// Narrows the results by a further predicate.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuery` if the predicate does not parse or does not
    /// fit the type.
    pub fn filtered(&self, predicate: &str) -> CoreResult<Results> {
        let layout = self.schema.layout(self.collection);
        let mut narrowed = self.clone();
        for comparison in parser::parse(predicate)? {
            narrowed
                .predicates
                .push(BoundComparison::bind(layout, comparison)?);
        }
        Ok(narrowed)
    }

    /// Number of matching objects.
    ///
    /// # Errors
    ///
    /// Returns `StaleAccessor` if the view has ended.
    pub fn len(&self) -> CoreResult<usize> {
        Ok(self.ids()?.len())
    }

    /// Returns true if nothing matches.
    ///
    /// # Errors
    ///
    /// Returns `StaleAccessor` if the view has ended.
    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// The match at position `index`.
    ///
    /// # Errors
    ///
    /// Returns `StaleAccessor` if the view has ended.
    pub fn get(&self, index: usize) -> CoreResult<Option<ObjectRef>> {
        Ok(self.ids()?.get(index).map(|id| self.object(*id)))
    }

    /// The first match.
    ///
    /// # Errors
    ///
    /// Returns `StaleAccessor` if the view has ended.
    pub fn first(&self) -> CoreResult<Option<ObjectRef>> {
        self.get(0)
    }

    /// Iterates the matches as of this call.
    ///
    /// # Errors
    ///
    /// Returns `StaleAccessor` if the view has ended.
    pub fn iter(&self) -> CoreResult<ResultsIter> {
        Ok(ResultsIter {
            inner: self.to_vec()?.into_iter(),
        })
    }

    /// Calls `f` on every match, stopping at the first error.
    ///
    /// # Errors
    ///
    /// Returns `StaleAccessor` if the view has ended, or the error `f`
    /// returned.
    pub fn for_each<F>(&self, mut f: F) -> CoreResult<()>
    where
        F: FnMut(&ObjectRef) -> CoreResult<()>,
    {
        for object in self.to_vec()? {
            f(&object)?;
        }
        Ok(())
    }

    /// Collects the matches.
    ///
    /// # Errors
    ///
    /// Returns `StaleAccessor` if the view has ended.
    pub fn to_vec(&self) -> CoreResult<Vec<ObjectRef>> {
        Ok(self.ids()?.into_iter().map(|id| self.object(id)).collect())
    }

    /// Ids of the matches in ascending order.
    ///
    /// # Errors
    ///
    /// Returns `StaleAccessor` if the view has ended.
    pub fn ids(&self) -> CoreResult<Vec<ObjectId>> {
        self.view
            .read(|state| self.evaluate(state.collection(self.collection)))
    }

    fn evaluate(&self, collection: &CollectionState) -> Vec<ObjectId> {
        let narrowest = self
            .predicates
            .iter()
            .filter_map(|p| p.candidates(&collection.indexes))
            .min_by_key(|ids| ids.len());

        let matches = |values: &[Value]| self.predicates.iter().all(|p| p.matches(values));
        match narrowest {
            Some(candidates) => candidates
                .into_iter()
                .filter(|id| collection.get(*id).is_some_and(matches))
                .collect(),
            None => collection
                .iter()
                .filter(|(_, values)| matches(*values))
                .map(|(id, _)| id)
                .collect(),
        }
    }

    fn object(&self, id: ObjectId) -> ObjectRef {
        ObjectRef::new(self.view.clone(), Arc::clone(&self.schema), self.collection, id)
    }
}

impl fmt::Debug for Results {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Results")
            .field("type", &self.type_name())
            .field("view", &self.view.id())
            .field("predicates", &self.predicates.len())
            .finish()
    }
}

/// Iterator over a materialized set of matches.
#[derive(Debug)]
pub struct ResultsIter {
    inner: std::vec::IntoIter<ObjectRef>,
}

impl Iterator for ResultsIter {
    type Item = ObjectRef;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for ResultsIter {}
