use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use portage_depgraph::{depdata, Atom, Error, Resolver, ResolverConfig};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

const STABLE: &str = "//third_party/portage-stable";
const BOARD: &str = "//overlays/overlay-board";

/// A source tree with two overlays and a board root using them.
struct Fixture {
    tmp: TempDir,
}

impl Fixture {
    fn new() -> Fixture {
        let fixture = Fixture {
            tmp: tempfile::tempdir().unwrap(),
        };
        let stable = fixture.stable();
        let board = fixture.board();

        fixture.write(&stable.join("profiles/repo_name"), "portage-stable\n");
        fixture.write(
            &stable.join("profiles/base/make.defaults"),
            "ARCH=\"amd64\"\nUSE=\"ssl\"\n",
        );
        fixture.write(&stable.join("profiles/base/package.mask"), ">=dev-libs/masked-2\n");
        fixture.write(&board.join("metadata/layout.conf"), "repo-name = board\n");
        fixture.write(&board.join("profiles/base/parent"), "portage-stable:base\n");

        let root = fixture.root();
        fixture.write(
            &root.join("etc/portage/make.conf"),
            &format!(
                "PORTDIR=\"{}\"\nPORTDIR_OVERLAY=\"{}\"\n",
                stable.display(),
                board.display()
            ),
        );
        fixture.write(&root.join("etc/portage/profile/package.provided"), "virtual/libc-1\n");
        symlink(
            "../../../src/overlays/overlay-board/profiles/base",
            root.join("etc/portage/make.profile"),
        )
        .unwrap();

        fixture
    }

    fn src(&self) -> PathBuf {
        self.tmp.path().join("src")
    }

    fn stable(&self) -> PathBuf {
        self.src().join("third_party/portage-stable")
    }

    fn board(&self) -> PathBuf {
        self.src().join("overlays/overlay-board")
    }

    fn root(&self) -> PathBuf {
        self.tmp.path().join("board")
    }

    fn write(&self, path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn ebuild(&self, overlay: &Path, name: &str, version: &str, body: &str) -> &Fixture {
        let short = name.split('/').nth(1).unwrap();
        self.write(
            &overlay.join(name).join(format!("{short}-{version}.ebuild")),
            &format!("EAPI=7\nSLOT=0\nKEYWORDS=\"*\"\n{body}"),
        );
        self
    }

    fn resolver(&self) -> Resolver {
        let config = ResolverConfig {
            source_root: self.src(),
            ..ResolverConfig::default()
        };
        Resolver::from_root(&self.root(), config).unwrap()
    }

    /// A small target with post-dependencies, a masked version, a provided
    /// package and distribution files.
    fn populate(&self) -> &Fixture {
        let stable = self.stable();
        self.ebuild(
            &self.board(),
            "virtual/target-os",
            "1",
            "RDEPEND=\"app-misc/p sys-libs/zlib ssl? ( dev-libs/masked ) virtual/libc\"\n",
        )
        .ebuild(&stable, "app-misc/p", "1", "RDEPEND=\"app-misc/q\"\n")
        .ebuild(
            &stable,
            "app-misc/q",
            "1",
            "SRC_URI=\"https://example.com/${P}.tar.gz\"\nPDEPEND=\"app-misc/r\"\n",
        )
        .ebuild(&stable, "app-misc/r", "1", "RDEPEND=\"app-misc/q\"\n")
        .ebuild(&stable, "sys-libs/zlib", "1.2", "")
        .ebuild(&stable, "sys-libs/zlib", "1.3", "KEYWORDS=\"~*\"\n")
        .ebuild(&stable, "dev-libs/masked", "1", "")
        .ebuild(&stable, "dev-libs/masked", "2", "");
        self.write(
            &stable.join("app-misc/q/Manifest"),
            "DIST q-1.tar.gz 10 SHA256 0102 SHA512 00ff\n",
        );
        self
    }
}

fn label(overlay: &str, name: &str) -> String {
    format!("{overlay}/{name}:0")
}

#[test]
fn resolve_board() {
    let fixture = Fixture::new();
    fixture.populate();
    let infos = fixture
        .resolver()
        .resolve(&[Atom::any_version("virtual/target-os")])
        .unwrap();

    let labels: Vec<&str> = infos.keys().map(String::as_str).collect();
    assert_eq!(
        labels,
        [
            label(BOARD, "virtual/target-os"),
            label(STABLE, "app-misc/p"),
            label(STABLE, "app-misc/q"),
            label(STABLE, "app-misc/r"),
            label(STABLE, "dev-libs/masked"),
            label(STABLE, "sys-libs/zlib"),
        ]
    );

    let target = &infos[&label(BOARD, "virtual/target-os")];
    assert_eq!(target.ebuild_path, "overlays/overlay-board/virtual/target-os/target-os-1.ebuild");
    assert_eq!(
        target.runtime_deps,
        [
            label(STABLE, "app-misc/p"),
            label(STABLE, "dev-libs/masked"),
            label(STABLE, "sys-libs/zlib"),
        ]
    );
    assert!(target.build_deps.is_empty());

    // Testing versions are preferred; masked versions are never picked.
    assert_eq!(infos[&label(STABLE, "sys-libs/zlib")].version, "1.3");
    assert_eq!(infos[&label(STABLE, "dev-libs/masked")].version, "1");

    let q = &infos[&label(STABLE, "app-misc/q")];
    let uri = &q.src_uris["q-1.tar.gz"];
    assert_eq!(uri.uris, ["https://example.com/q-1.tar.gz"]);
    assert_eq!(uri.size, 10);
    assert_eq!(uri.integrity, "sha512-AP8=");
    assert_eq!(uri.sha256, "0102");
}

#[test]
fn post_deps_reach_runtime_dependents() {
    let fixture = Fixture::new();
    fixture.populate();
    let infos = fixture
        .resolver()
        .resolve(&[Atom::any_version("virtual/target-os")])
        .unwrap();

    let r = label(STABLE, "app-misc/r");
    for name in ["virtual/target-os", "app-misc/p", "app-misc/q"] {
        let overlay = if name.starts_with("virtual/") { BOARD } else { STABLE };
        assert_eq!(infos[&label(overlay, name)].post_deps, [r.clone()], "{name}");
    }
    assert!(infos[&r].post_deps.is_empty());
    assert!(infos[&label(STABLE, "sys-libs/zlib")].post_deps.is_empty());
}

#[test]
fn missing_package_is_no_candidate() {
    let fixture = Fixture::new();
    fixture.populate();
    let err = fixture
        .resolver()
        .resolve(&["app-misc/nope".parse().unwrap()])
        .unwrap_err();
    match err {
        Error::NoCandidate { atom } => assert_eq!(atom, "app-misc/nope"),
        other => panic!("expected NoCandidate, got {other}"),
    }
}

#[test]
fn resolution_is_deterministic() {
    let fixture = Fixture::new();
    fixture.populate();
    let start = [Atom::any_version("virtual/target-os")];
    let first = fixture.resolver().resolve(&start).unwrap();
    let second = fixture.resolver().resolve(&start).unwrap();
    assert_eq!(first, second);

    let path = fixture.tmp.path().join("deps.json");
    depdata::save(&path, &first).unwrap();
    assert_eq!(depdata::load(&path).unwrap(), first);
}

#[test]
fn build_cycle_is_reported() {
    let fixture = Fixture::new();
    let stable = fixture.stable();
    fixture
        .ebuild(&stable, "dev-libs/a", "1", "DEPEND=\"dev-libs/b\"\n")
        .ebuild(&stable, "dev-libs/b", "1", "BDEPEND=\"dev-libs/a\"\n");
    let err = fixture
        .resolver()
        .resolve(&[Atom::any_version("dev-libs/a")])
        .unwrap_err();
    match err.root_cause() {
        Error::Cycle { label: cycle } => assert_eq!(*cycle, label(STABLE, "dev-libs/a")),
        other => panic!("expected Cycle, got {other}"),
    }
}

#[test]
fn missing_profile_link() {
    let fixture = Fixture::new();
    fs::remove_file(fixture.root().join("etc/portage/make.profile")).unwrap();
    let result = Resolver::from_root(&fixture.root(), ResolverConfig::default());
    assert!(matches!(result, Err(Error::Io { .. })));
}
