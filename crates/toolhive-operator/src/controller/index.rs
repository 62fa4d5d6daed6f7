// Reverse-lookup helpers over reflector stores.
//
// Cross-references are stored forward-only (referrer names referent); the
// reverse view is computed from the informer cache on demand, so a referent
// change fans out to requeues without an O(all-objects) API scan.

use kube::ResourceExt;
use kube::runtime::reflector::{ObjectRef, Store};
use serde::de::DeserializeOwned;

/// Referrers in `store` within `namespace` for which `references` holds.
pub fn referrers<K, F>(store: &Store<K>, namespace: &str, references: F) -> Vec<ObjectRef<K>>
where
	K: kube::Resource<DynamicType = ()> + Clone + DeserializeOwned + std::fmt::Debug + 'static,
	F: Fn(&K) -> bool,
{
	store
		.state()
		.into_iter()
		.filter(|obj| obj.namespace().as_deref() == Some(namespace))
		.filter(|obj| references(obj))
		.map(|obj| ObjectRef::from_obj(obj.as_ref()))
		.collect()
}
