use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use cairn_types::error::{CairnError, Result};

/// Logical layout of the snapshot derived from the target paths.
///
/// Mirrors `tar`: absolute targets keep their full path structure in the
/// snapshot, relative targets keep their components verbatim. Interior
/// nodes are synthetic directories whose metadata is taken from
/// `file_info_path`; leaves carry the concrete filesystem path to
/// archive.
#[derive(Debug, Default)]
pub struct PathTree {
    children: BTreeMap<String, PathTree>,
    path: Option<PathBuf>,
    file_info_path: Option<PathBuf>,
}

impl PathTree {
    /// Build the tree from cleaned targets. Targets that reduce to zero
    /// components must have been expanded by the caller beforehand.
    pub fn build(targets: &[PathBuf]) -> Result<PathTree> {
        let mut root = PathTree::default();
        for target in targets {
            let components = path_components(target);
            if components.is_empty() {
                return Err(CairnError::InvalidTarget(target.display().to_string()));
            }
            let prefix = if target.is_absolute() {
                PathBuf::from("/")
            } else {
                PathBuf::new()
            };
            root.add(target, &components, prefix)?;
        }
        Ok(root)
    }

    fn add(&mut self, target: &Path, components: &[String], prefix: PathBuf) -> Result<()> {
        let name = &components[0];
        let node_prefix = prefix.join(name);

        if components.len() == 1 {
            if self.children.contains_key(name) {
                return Err(CairnError::DuplicateTarget(target.display().to_string()));
            }
            self.children.insert(
                name.clone(),
                PathTree {
                    children: BTreeMap::new(),
                    path: Some(target.to_path_buf()),
                    file_info_path: None,
                },
            );
            return Ok(());
        }

        let entry = self
            .children
            .entry(name.clone())
            .or_insert_with(|| PathTree {
                children: BTreeMap::new(),
                path: None,
                file_info_path: Some(node_prefix.clone()),
            });
        if entry.path.is_some() {
            // a leaf already occupies this name
            return Err(CairnError::DuplicateTarget(target.display().to_string()));
        }
        entry.add(target, &components[1..], node_prefix)
    }

    /// Children in name order.
    pub fn children(&self) -> impl Iterator<Item = (&String, &PathTree)> {
        self.children.iter()
    }

    /// The concrete path to archive; `Some` marks a leaf.
    pub fn leaf_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// For interior nodes: the on-disk directory whose stat populates the
    /// synthetic directory node.
    pub fn file_info_path(&self) -> Option<&Path> {
        self.file_info_path.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

/// The named components of `path`. The root, `.` and `..` name nothing:
/// a target consisting only of relative movement has zero components.
fn path_components(path: &Path) -> Vec<String> {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            Component::RootDir
            | Component::CurDir
            | Component::ParentDir
            | Component::Prefix(_) => None,
        })
        .collect()
}

/// `false` for targets like `.`, `/` or `../..` that name no component
/// and must be expanded into their directory entries instead.
pub(crate) fn has_components(path: &Path) -> bool {
    !path_components(path).is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(targets: &[&str]) -> PathTree {
        let paths: Vec<PathBuf> = targets.iter().map(PathBuf::from).collect();
        PathTree::build(&paths).unwrap()
    }

    fn child<'a>(tree: &'a PathTree, name: &str) -> &'a PathTree {
        tree.children
            .get(name)
            .unwrap_or_else(|| panic!("missing child {name}"))
    }

    #[test]
    fn absolute_target_preserves_full_path() {
        let tree = build(&["/home/u/foo"]);
        let home = child(&tree, "home");
        assert_eq!(home.file_info_path(), Some(Path::new("/home")));
        assert!(home.leaf_path().is_none());

        let u = child(home, "u");
        assert_eq!(u.file_info_path(), Some(Path::new("/home/u")));

        let foo = child(u, "foo");
        assert_eq!(foo.leaf_path(), Some(Path::new("/home/u/foo")));
        assert!(foo.children.is_empty());
    }

    #[test]
    fn relative_target_keeps_components_verbatim() {
        let tree = build(&["user/foo"]);
        let user = child(&tree, "user");
        assert_eq!(user.file_info_path(), Some(Path::new("user")));
        let foo = child(user, "foo");
        assert_eq!(foo.leaf_path(), Some(Path::new("user/foo")));
    }

    #[test]
    fn sibling_targets_share_intermediates() {
        let tree = build(&["/srv/a", "/srv/b"]);
        let srv = child(&tree, "srv");
        assert_eq!(srv.children.len(), 2);
        assert_eq!(child(srv, "a").leaf_path(), Some(Path::new("/srv/a")));
        assert_eq!(child(srv, "b").leaf_path(), Some(Path::new("/srv/b")));
    }

    #[test]
    fn children_iterate_in_name_order() {
        let tree = build(&["/x/c", "/x/a", "/x/b"]);
        let x = child(&tree, "x");
        let names: Vec<&str> = x.children().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn duplicate_leaf_is_rejected() {
        let paths = vec![PathBuf::from("/a/b"), PathBuf::from("/a/b")];
        assert!(matches!(
            PathTree::build(&paths),
            Err(CairnError::DuplicateTarget(_))
        ));
    }

    #[test]
    fn leaf_conflicting_with_intermediate_is_rejected() {
        // `/a` as a leaf clashes with `/a` as the intermediate of `/a/b`.
        let paths = vec![PathBuf::from("/a/b"), PathBuf::from("/a")];
        assert!(matches!(
            PathTree::build(&paths),
            Err(CairnError::DuplicateTarget(_))
        ));

        let paths = vec![PathBuf::from("/a"), PathBuf::from("/a/b")];
        assert!(matches!(
            PathTree::build(&paths),
            Err(CairnError::DuplicateTarget(_))
        ));
    }

    #[test]
    fn zero_component_target_is_invalid() {
        assert!(matches!(
            PathTree::build(&[PathBuf::from(".")]),
            Err(CairnError::InvalidTarget(_))
        ));
        assert!(matches!(
            PathTree::build(&[PathBuf::from("/")]),
            Err(CairnError::InvalidTarget(_))
        ));
    }

    #[test]
    fn has_components_detects_expandable_targets() {
        assert!(!has_components(Path::new(".")));
        assert!(!has_components(Path::new("/")));
        assert!(!has_components(Path::new("../..")));
        assert!(has_components(Path::new("a")));
        assert!(has_components(Path::new("/a")));
        assert!(has_components(Path::new("../a")));
    }

    #[test]
    fn parent_components_are_dropped_from_the_layout() {
        let tree = build(&["../foo"]);
        let foo = child(&tree, "foo");
        assert_eq!(foo.leaf_path(), Some(Path::new("../foo")));
    }
}
