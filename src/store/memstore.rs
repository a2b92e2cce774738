//! Simple in-memory store.
//!
//! This implementation has state, so if you create a
//! new instance in a handler(), it will be empty every time.
//!
//! Create it once with `MemStore::new`, fill it with `add_collection` and
//! `add_resource`, and share the `Arc` between handlers.
//!
//! Access can be refused per path or per property with the `deny_*`
//! methods, to exercise the Forbidden/Unauthorized handling of a server.
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures_util::FutureExt;
use parking_lot::RwLock;

use crate::davpath::DavPath;
use crate::props::PropValue;
use crate::store::*;

const GETETAG: &str = "{DAV:}getetag";
const GETCONTENTLENGTH: &str = "{DAV:}getcontentlength";
const GETCONTENTTYPE: &str = "{DAV:}getcontenttype";
const GETLASTMODIFIED: &str = "{DAV:}getlastmodified";
const CREATIONDATE: &str = "{DAV:}creationdate";

/// Ephemeral in-memory resource tree.
#[derive(Debug)]
pub struct MemStore {
    tree: RwLock<Tree>,
}

#[derive(Debug, Clone)]
struct Node {
    collection: bool,
    id: u64,
    version: u64,
    props: HashMap<String, PropValue>,
    // dead properties, insertion order.
    dead: Vec<(String, String)>,
}

#[derive(Debug, Default)]
struct Tree {
    nodes: BTreeMap<String, Node>,
    next_id: u64,
    // listing / creating members of a collection.
    deny_path: HashMap<String, StoreError>,
    // reading and writing a property.
    deny_prop: HashMap<(String, String), StoreError>,
    // writing a property only.
    deny_write: HashMap<(String, String), StoreError>,
}

// key of the parent of a key.
fn parent_key(key: &str) -> &str {
    match key.rfind('/') {
        Some(0) | None => "/",
        Some(n) => &key[..n],
    }
}

fn join_key(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}

fn is_below(key: &str, base: &str) -> bool {
    key != base && (base == "/" || (key.starts_with(base) && key.as_bytes().get(base.len()) == Some(&b'/')))
}

fn key_of(path: &str) -> StoreResult<String> {
    DavPath::new(path)
        .map(|p| p.key())
        .map_err(|_| StoreError::GeneralFailure)
}

impl Node {
    fn etag(&self) -> String {
        format!("\"{:x}-{:x}\"", self.id, self.version)
    }
}

impl Tree {
    fn new_node(&mut self, collection: bool) -> Node {
        self.next_id += 1;
        let now = time::OffsetDateTime::now_utc();
        let mut props = HashMap::new();
        props.insert(CREATIONDATE.to_string(), PropValue::DateTime(now));
        props.insert(GETLASTMODIFIED.to_string(), PropValue::DateTime(now));
        Node {
            collection,
            id: self.next_id,
            version: 1,
            props,
            dead: Vec::new(),
        }
    }

    fn node(&self, key: &str) -> StoreResult<&Node> {
        self.nodes.get(key).ok_or(StoreError::NotFound)
    }

    fn node_mut(&mut self, key: &str) -> StoreResult<&mut Node> {
        self.nodes.get_mut(key).ok_or(StoreError::NotFound)
    }

    fn check_path(&self, key: &str) -> StoreResult<()> {
        match self.deny_path.get(key) {
            Some(e) => Err(*e),
            None => Ok(()),
        }
    }

    fn check_prop(&self, key: &str, tag: &str, write: bool) -> StoreResult<()> {
        let k = (key.to_string(), tag.to_string());
        if let Some(e) = self.deny_prop.get(&k) {
            return Err(*e);
        }
        if write {
            if let Some(e) = self.deny_write.get(&k) {
                return Err(*e);
            }
        }
        Ok(())
    }

    // the collection a new member goes into.
    fn check_parent(&self, key: &str) -> StoreResult<()> {
        self.check_path(key)?;
        match self.nodes.get(key) {
            Some(n) if n.collection => Ok(()),
            _ => Err(StoreError::Conflict),
        }
    }

    fn remove_tree(&mut self, key: &str) {
        self.nodes.retain(|k, _| k != key && !is_below(k, key));
    }

    // (key, node) pairs of key and everything below it.
    fn subtree(&self, key: &str) -> Vec<(String, Node)> {
        self.nodes
            .iter()
            .filter(|(k, _)| k.as_str() == key || is_below(k, key))
            .map(|(k, n)| (k.clone(), n.clone()))
            .collect()
    }

    fn insert(&mut self, key: &str, collection: bool, content: Option<&[u8]>) -> StoreResult<()> {
        if self.nodes.contains_key(key) {
            return Err(StoreError::Exists);
        }
        if key != "/" {
            self.check_parent(parent_key(key))?;
        }
        let mut node = self.new_node(collection);
        if let Some(data) = content {
            node.props
                .insert(GETCONTENTLENGTH.to_string(), PropValue::Int(data.len() as i64));
            let mime = mime_guess::from_path(key).first_or_octet_stream();
            node.props
                .insert(GETCONTENTTYPE.to_string(), PropValue::Text(mime.to_string()));
        }
        self.nodes.insert(key.to_string(), node);
        Ok(())
    }
}

impl MemStore {
    /// Create a new, empty store with just a root collection.
    pub fn new() -> Arc<MemStore> {
        let mut tree = Tree::default();
        let root = tree.new_node(true);
        tree.nodes.insert("/".to_string(), root);
        Arc::new(MemStore {
            tree: RwLock::new(tree),
        })
    }

    /// Add a collection. The parent must exist.
    pub fn add_collection(&self, path: &str) -> StoreResult<()> {
        let key = key_of(path)?;
        self.tree.write().insert(&key, true, None)
    }

    /// Add a leaf resource. The parent must exist.
    pub fn add_resource(&self, path: &str, content: impl AsRef<[u8]>) -> StoreResult<()> {
        let key = key_of(path)?;
        self.tree.write().insert(&key, false, Some(content.as_ref()))
    }

    /// Does a resource exist.
    pub fn exists(&self, path: &str) -> bool {
        match key_of(path) {
            Ok(key) => self.tree.read().nodes.contains_key(&key),
            Err(_) => false,
        }
    }

    /// Refuse listing `path` and creating members in it.
    pub fn deny_path(&self, path: &str, err: StoreError) {
        if let Ok(key) = key_of(path) {
            self.tree.write().deny_path.insert(key, err);
        }
    }

    /// Refuse reading and writing property `tag` of `path`.
    pub fn deny_property(&self, path: &str, tag: &str, err: StoreError) {
        if let Ok(key) = key_of(path) {
            self.tree
                .write()
                .deny_prop
                .insert((key, tag.to_string()), err);
        }
    }

    /// Refuse writing property `tag` of `path`. Reads still work.
    pub fn deny_write(&self, path: &str, tag: &str, err: StoreError) {
        if let Ok(key) = key_of(path) {
            self.tree
                .write()
                .deny_write
                .insert((key, tag.to_string()), err);
        }
    }
}

impl DavStore for MemStore {
    fn metadata<'a>(&'a self, path: &'a DavPath) -> StoreFuture<'a, ResourceMeta> {
        async move {
            trace!("MemStore: metadata {:?}", path);
            let tree = self.tree.read();
            let node = tree.node(&path.key())?;
            Ok(match node.collection {
                true => ResourceMeta::collection(),
                false => ResourceMeta::leaf(Some(node.etag())),
            })
        }
        .boxed()
    }

    fn list_children<'a>(&'a self, path: &'a DavPath) -> StoreFuture<'a, Vec<DavPath>> {
        async move {
            trace!("MemStore: list_children {:?}", path);
            let key = path.key();
            let tree = self.tree.read();
            tree.check_path(&key)?;
            if !tree.node(&key)?.collection {
                return Err(StoreError::Forbidden);
            }
            let children = tree
                .nodes
                .keys()
                .filter(|k| k.as_str() != "/" && parent_key(k) == key)
                .map(|k| {
                    let mut p = path.clone();
                    p.add_slash();
                    p.push_segment(k[k.rfind('/').map(|n| n + 1).unwrap_or(0)..].as_bytes());
                    p
                })
                .collect();
            Ok(children)
        }
        .boxed()
    }

    fn read_property<'a>(&'a self, path: &'a DavPath, tag: &'a str) -> StoreFuture<'a, Option<PropValue>> {
        async move {
            trace!("MemStore: read_property {:?} {}", path, tag);
            let key = path.key();
            let tree = self.tree.read();
            tree.check_prop(&key, tag, false)?;
            let node = tree.node(&key)?;
            if tag == GETETAG {
                return Ok(match node.collection {
                    true => None,
                    false => Some(PropValue::Text(node.etag())),
                });
            }
            Ok(node.props.get(tag).cloned())
        }
        .boxed()
    }

    fn write_property<'a>(&'a self, path: &'a DavPath, tag: &'a str, value: PropValue) -> StoreFuture<'a, ()> {
        async move {
            trace!("MemStore: write_property {:?} {}", path, tag);
            let key = path.key();
            let mut tree = self.tree.write();
            tree.check_prop(&key, tag, true)?;
            let node = tree.node_mut(&key)?;
            node.props.insert(tag.to_string(), value);
            node.version += 1;
            Ok(())
        }
        .boxed()
    }

    fn clear_property<'a>(&'a self, path: &'a DavPath, tag: &'a str) -> StoreFuture<'a, ()> {
        async move {
            trace!("MemStore: clear_property {:?} {}", path, tag);
            let key = path.key();
            let mut tree = self.tree.write();
            tree.check_prop(&key, tag, true)?;
            let node = tree.node_mut(&key)?;
            if node.props.remove(tag).is_some() {
                node.version += 1;
            }
            Ok(())
        }
        .boxed()
    }

    fn have_opaque_properties<'a>(&'a self, path: &'a DavPath) -> StoreFuture<'a, bool> {
        async move {
            let tree = self.tree.read();
            tree.node(&path.key())?;
            Ok(true)
        }
        .boxed()
    }

    fn get_opaque_property<'a>(&'a self, path: &'a DavPath, tag: &'a str) -> StoreFuture<'a, Option<String>> {
        async move {
            trace!("MemStore: get_opaque_property {:?} {}", path, tag);
            let key = path.key();
            let tree = self.tree.read();
            tree.check_prop(&key, tag, false)?;
            let node = tree.node(&key)?;
            Ok(node
                .dead
                .iter()
                .find(|(t, _)| t == tag)
                .map(|(_, xml)| xml.clone()))
        }
        .boxed()
    }

    fn set_opaque_property<'a>(&'a self, path: &'a DavPath, tag: &'a str, xml: String) -> StoreFuture<'a, ()> {
        async move {
            trace!("MemStore: set_opaque_property {:?} {}", path, tag);
            let key = path.key();
            let mut tree = self.tree.write();
            tree.check_prop(&key, tag, true)?;
            let node = tree.node_mut(&key)?;
            match node.dead.iter_mut().find(|(t, _)| t == tag) {
                Some(entry) => entry.1 = xml,
                None => node.dead.push((tag.to_string(), xml)),
            }
            Ok(())
        }
        .boxed()
    }

    fn remove_opaque_property<'a>(&'a self, path: &'a DavPath, tag: &'a str) -> StoreFuture<'a, ()> {
        async move {
            trace!("MemStore: remove_opaque_property {:?} {}", path, tag);
            let key = path.key();
            let mut tree = self.tree.write();
            tree.check_prop(&key, tag, true)?;
            let node = tree.node_mut(&key)?;
            node.dead.retain(|(t, _)| t != tag);
            Ok(())
        }
        .boxed()
    }

    fn list_opaque_properties<'a>(&'a self, path: &'a DavPath) -> StoreFuture<'a, Vec<(String, String)>> {
        async move {
            let tree = self.tree.read();
            Ok(tree.node(&path.key())?.dead.clone())
        }
        .boxed()
    }

    fn create_collection<'a>(&'a self, parent: &'a DavPath, name: &'a str) -> StoreFuture<'a, ()> {
        async move {
            trace!("MemStore: create_collection {:?} {}", parent, name);
            let key = join_key(&parent.key(), name);
            self.tree.write().insert(&key, true, None)
        }
        .boxed()
    }

    fn copy_to<'a>(
        &'a self,
        src: &'a DavPath,
        target_parent: &'a DavPath,
        name: &'a str,
        deep: bool,
    ) -> StoreFuture<'a, ()> {
        async move {
            trace!("MemStore: copy_to {:?} {:?} {} deep={}", src, target_parent, name, deep);
            let src_key = src.key();
            let dst_parent = target_parent.key();
            let dst_key = join_key(&dst_parent, name);
            let mut tree = self.tree.write();
            tree.check_parent(&dst_parent)?;
            tree.node(&src_key)?;
            if dst_key == src_key || is_below(&dst_key, &src_key) {
                return Err(StoreError::Forbidden);
            }
            let mut copies = tree.subtree(&src_key);
            if !deep {
                copies.retain(|(k, _)| *k == src_key);
            }
            tree.remove_tree(&dst_key);
            for (k, mut node) in copies {
                tree.next_id += 1;
                node.id = tree.next_id;
                node.version = 1;
                let k = format!("{}{}", dst_key, &k[src_key.len()..]);
                tree.nodes.insert(k, node);
            }
            Ok(())
        }
        .boxed()
    }

    fn move_to<'a>(&'a self, src: &'a DavPath, target_parent: &'a DavPath, name: &'a str) -> StoreFuture<'a, ()> {
        async move {
            trace!("MemStore: move_to {:?} {:?} {}", src, target_parent, name);
            let src_key = src.key();
            let dst_parent = target_parent.key();
            let dst_key = join_key(&dst_parent, name);
            let mut tree = self.tree.write();
            tree.check_parent(&dst_parent)?;
            tree.check_path(parent_key(&src_key))?;
            tree.node(&src_key)?;
            if src_key == "/" || dst_key == src_key || is_below(&dst_key, &src_key) {
                return Err(StoreError::Forbidden);
            }
            let moved = tree.subtree(&src_key);
            tree.remove_tree(&dst_key);
            tree.remove_tree(&src_key);
            for (k, node) in moved {
                let k = format!("{}{}", dst_key, &k[src_key.len()..]);
                tree.nodes.insert(k, node);
            }
            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> DavPath {
        DavPath::new(s).unwrap()
    }

    #[tokio::test]
    async fn tree_and_listing() {
        let store = MemStore::new();
        store.add_collection("/a").unwrap();
        store.add_resource("/a/x.txt", "hello").unwrap();
        store.add_resource("/a/y.txt", "").unwrap();
        assert_eq!(store.add_resource("/nope/z", ""), Err(StoreError::Conflict));
        assert_eq!(store.add_collection("/a"), Err(StoreError::Exists));

        let children = store.list_children(&p("/a/")).await.unwrap();
        let names = children.iter().map(|c| c.as_url_string()).collect::<Vec<_>>();
        assert_eq!(names, vec!["/a/x.txt", "/a/y.txt"]);

        let ct = store.read_property(&p("/a/x.txt"), GETCONTENTTYPE).await.unwrap();
        assert_eq!(ct, Some(PropValue::Text("text/plain".to_string())));
        let len = store.read_property(&p("/a/x.txt"), GETCONTENTLENGTH).await.unwrap();
        assert_eq!(len, Some(PropValue::Int(5)));
    }

    #[tokio::test]
    async fn dead_properties_keep_insertion_order() {
        let store = MemStore::new();
        let root = p("/");
        store.set_opaque_property(&root, "{urn:x}b", "<b/>".into()).await.unwrap();
        store.set_opaque_property(&root, "{urn:x}a", "<a/>".into()).await.unwrap();
        store.set_opaque_property(&root, "{urn:x}b", "<b>2</b>".into()).await.unwrap();
        let v = store.list_opaque_properties(&root).await.unwrap();
        assert_eq!(
            v,
            vec![
                ("{urn:x}b".to_string(), "<b>2</b>".to_string()),
                ("{urn:x}a".to_string(), "<a/>".to_string()),
            ]
        );
        store.remove_opaque_property(&root, "{urn:x}b").await.unwrap();
        assert_eq!(store.get_opaque_property(&root, "{urn:x}b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn denials() {
        let store = MemStore::new();
        store.add_collection("/a").unwrap();
        store.deny_path("/a", StoreError::Unauthorized);
        assert_eq!(store.list_children(&p("/a")).await.unwrap_err(), StoreError::Unauthorized);
        assert_eq!(
            store.create_collection(&p("/a"), "b").await.unwrap_err(),
            StoreError::Unauthorized
        );
        store.deny_write("/", "{DAV:}displayname", StoreError::Forbidden);
        let v = PropValue::Text("x".into());
        assert_eq!(
            store.write_property(&p("/"), "{DAV:}displayname", v).await.unwrap_err(),
            StoreError::Forbidden
        );
        assert_eq!(store.read_property(&p("/"), "{DAV:}displayname").await.unwrap(), None);
    }

    #[tokio::test]
    async fn live_writes_change_etag() {
        let store = MemStore::new();
        store.add_resource("/f", "data").unwrap();
        let f = p("/f");
        let etag = |store: &Arc<MemStore>| {
            let tree = store.tree.read();
            tree.node("/f").unwrap().etag()
        };

        let e1 = etag(&store);
        let v = PropValue::Text("name".into());
        store.write_property(&f, "{DAV:}displayname", v).await.unwrap();
        let e2 = etag(&store);
        assert_ne!(e1, e2);
        assert_eq!(store.metadata(&f).await.unwrap().etag, Some(e2.clone()));

        store.clear_property(&f, "{DAV:}displayname").await.unwrap();
        assert_eq!(store.read_property(&f, "{DAV:}displayname").await.unwrap(), None);
        assert_ne!(etag(&store), e2);

        // clearing what is not there changes nothing.
        let e3 = etag(&store);
        store.clear_property(&f, "{DAV:}displayname").await.unwrap();
        assert_eq!(etag(&store), e3);
    }

    #[tokio::test]
    async fn copy_and_move() {
        let store = MemStore::new();
        store.add_collection("/a").unwrap();
        store.add_resource("/a/f", "data").unwrap();
        store.add_collection("/b").unwrap();

        store.copy_to(&p("/a"), &p("/b"), "c", false).await.unwrap();
        assert!(store.exists("/b/c"));
        assert!(!store.exists("/b/c/f"));
        store.copy_to(&p("/a"), &p("/b"), "c", true).await.unwrap();
        assert!(store.exists("/b/c/f"));
        let e1 = store.metadata(&p("/a/f")).await.unwrap().etag;
        let e2 = store.metadata(&p("/b/c/f")).await.unwrap().etag;
        assert_ne!(e1, e2);

        store.move_to(&p("/a"), &p("/b"), "m").await.unwrap();
        assert!(!store.exists("/a"));
        assert!(!store.exists("/a/f"));
        assert!(store.exists("/b/m/f"));
        assert_eq!(store.move_to(&p("/b"), &p("/b/m"), "x").await, Err(StoreError::Forbidden));
    }
}
