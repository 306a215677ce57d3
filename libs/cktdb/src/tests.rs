use approx::assert_relative_eq;
use test_log::test;

use crate::*;

/// A two-inverter design: `nch`/`pch` prims, a `pinv` cell with default
/// `w=2 l=2`, and a `top` cell instantiating it twice with different
/// width overrides.
fn inverter_ckt() -> (Ckt, ScopeId, ScopeId) {
    let mut ckt = Ckt::new("$root");
    let root = ckt.root();
    ckt.add_prim(
        root,
        "nch",
        "mos",
        &["s", "g", "d", "b"],
        &[("w", "1"), ("l", "1")],
    )
    .unwrap();
    ckt.add_prim(
        root,
        "pch",
        "mos",
        &["s", "g", "d", "b"],
        &[("w", "1"), ("l", "1")],
    )
    .unwrap();

    let pinv = ckt
        .add_cell(
            root,
            "pinv",
            &["a", "y", "vdd", "vss"],
            &[("w", "2"), ("l", "2")],
        )
        .unwrap();
    {
        let scope = ckt.scope_mut(pinv);
        let mn = scope.add_instance("mn", "nch").unwrap();
        mn.set_param("w", "w").unwrap();
        mn.set_param("l", "l").unwrap();
        mn.add_pin(Some("s"), "vss");
        mn.add_pin(Some("g"), "a");
        mn.add_pin(Some("d"), "y");
        mn.add_pin(Some("b"), "vss");
        let mp = scope.add_instance("mp", "pch").unwrap();
        mp.set_param("w", "w").unwrap();
        mp.set_param("l", "l").unwrap();
        mp.add_pin(Some("s"), "vdd");
        mp.add_pin(Some("g"), "a");
        mp.add_pin(Some("d"), "y");
        mp.add_pin(Some("b"), "vdd");
    }

    let top = ckt
        .add_cell(root, "top", &["in", "out", "vdd", "vss"], &[])
        .unwrap();
    {
        let scope = ckt.scope_mut(top);
        scope.add_net("n1").unwrap();
        let x1 = scope.add_instance("x1", "pinv").unwrap();
        x1.set_hierarchical(true);
        x1.set_param("w", "3").unwrap();
        x1.add_pin(None, "in");
        x1.add_pin(None, "n1");
        x1.add_pin(None, "vdd");
        x1.add_pin(None, "vss");
        let x2 = scope.add_instance("x2", "pinv").unwrap();
        x2.set_hierarchical(true);
        x2.set_param("w", "5").unwrap();
        x2.add_pin(None, "n1");
        x2.add_pin(None, "out");
        x2.add_pin(None, "vdd");
        x2.add_pin(None, "vss");
    }
    (ckt, top, pinv)
}

#[test]
fn positional_pin_binding() {
    let (mut ckt, top, pinv) = inverter_ckt();
    let root = ckt.root();
    ckt.link(root).unwrap();

    let ports: Vec<_> = ckt
        .scope(pinv)
        .all_ports()
        .map(|p| p.name().clone())
        .collect();
    let x1 = ckt.scope(top).get_instance("x1").unwrap();
    assert!(x1.is_linked());
    assert_eq!(x1.reference(), Some(pinv));
    assert_eq!(x1.pins().len(), ports.len());
    for (k, pin) in x1.pins().iter().enumerate() {
        assert_eq!(pin.port(), Some(&ports[k]));
    }
}

#[test]
fn linking_is_idempotent() {
    let (mut ckt, _, pinv) = inverter_ckt();
    let root = ckt.root();
    ckt.link(root).unwrap();
    ckt.link(root).unwrap();
    assert_eq!(ckt.scope(pinv).ref_count(), 2);
}

#[test]
fn unresolved_reference() {
    let (mut ckt, top, _) = inverter_ckt();
    ckt.scope_mut(top)
        .add_instance("xbad", "nonexistent")
        .unwrap()
        .set_hierarchical(true);
    let root = ckt.root();
    let err = ckt.link(root).unwrap_err();
    assert!(matches!(err, LinkError::UnresolvedReference { .. }));
    assert!(!ckt.scope(top).get_instance("xbad").unwrap().is_linked());
}

#[test]
fn port_count_mismatch_leaves_instance_untouched() {
    let (mut ckt, top, pinv) = inverter_ckt();
    {
        let scope = ckt.scope_mut(top);
        let xshort = scope.add_instance("xshort", "pinv").unwrap();
        xshort.set_hierarchical(true);
        xshort.add_pin(None, "in");
        xshort.add_pin(None, "out");
        xshort.add_pin(None, "vdd");
    }
    let root = ckt.root();
    let err = ckt.link(root).unwrap_err();
    assert!(matches!(err, LinkError::PortCountMismatch { .. }));
    let xshort = ckt.scope(top).get_instance("xshort").unwrap();
    assert!(!xshort.is_linked());
    assert_eq!(xshort.reference(), None);
    // the failed instance did not bump the target's reference count
    assert_eq!(ckt.scope(pinv).ref_count(), 2);
}

#[test]
fn best_effort_linking_collects_errors() {
    let (mut ckt, top, _) = inverter_ckt();
    {
        let scope = ckt.scope_mut(top);
        scope
            .add_instance("xbad", "nonexistent")
            .unwrap()
            .set_hierarchical(true);
        let xshort = scope.add_instance("xshort", "pinv").unwrap();
        xshort.set_hierarchical(true);
        xshort.add_pin(None, "in");
    }
    let root = ckt.root();
    let issues = ckt.link_ignoring_errors(root);
    assert!(issues.has_error());
    assert_eq!(issues.len(), 2);
    // everything that could link, linked
    assert!(ckt.scope(top).get_instance("x1").unwrap().is_linked());
    assert!(ckt.scope(top).get_instance("x2").unwrap().is_linked());
}

#[test]
fn scope_chain_shadowing() {
    let mut ckt = Ckt::new("$root");
    let root = ckt.root();
    let outer_inv = ckt.add_cell(root, "inv", &["a"], &[]).unwrap();
    let wrapper = ckt.add_cell(root, "wrapper", &["p"], &[]).unwrap();
    let inner_inv = ckt.add_cell(wrapper, "inv", &["x", "y"], &[]).unwrap();
    {
        let scope = ckt.scope_mut(wrapper);
        scope.add_net("q").unwrap();
        let i0 = scope.add_instance("i0", "inv").unwrap();
        i0.set_hierarchical(true);
        i0.add_pin(None, "p");
        i0.add_pin(None, "q");
    }
    ckt.link(root).unwrap();

    // innermost declaration wins
    assert_eq!(
        ckt.scope(wrapper).get_instance("i0").unwrap().reference(),
        Some(inner_inv)
    );
    assert_eq!(ckt.search_scope_cell(wrapper, "inv").unwrap(), inner_inv);
    assert_eq!(ckt.search_scope_cell(root, "inv").unwrap(), outer_inv);
    assert!(matches!(
        ckt.search_scope_cell(root, "nope"),
        Err(Error::NotFound { .. })
    ));
    assert_eq!(ckt.full_name(inner_inv), "$root/wrapper/inv");
}

#[test]
fn topcells_after_linking() {
    let (mut ckt, top, _) = inverter_ckt();
    let root = ckt.root();
    ckt.link(root).unwrap();
    assert_eq!(ckt.get_topcells(), vec![top]);
}

#[test]
fn ref_param_evaluation() {
    let mut ckt = Ckt::new("$root");
    let root = ckt.root();
    ckt.add_prim(
        root,
        "pcap",
        "cap",
        &["plus", "minus"],
        &[
            ("w", "1"),
            ("l", "1"),
            ("cga", "\"1fF/(1um*20nm)\""),
            ("cg", "\"m*w*l*cga\""),
        ],
    )
    .unwrap();
    let dut = ckt.add_cell(root, "dut", &["t"], &[]).unwrap();
    {
        let scope = ckt.scope_mut(dut);
        scope.add_net("b").unwrap();
        let c0 = scope.add_instance("c0", "pcap").unwrap();
        c0.set_param("w", "2").unwrap();
        c0.set_param("l", "1").unwrap();
        c0.set_param("m", "1").unwrap();
        c0.add_pin(None, "t");
        c0.add_pin(None, "b");
        let c1 = scope.add_instance("c1", "pcap").unwrap();
        c1.add_pin(None, "t");
        c1.add_pin(None, "b");
    }
    ckt.link(root).unwrap();

    let cg = ckt.eval_ref_param(dut, "c0", "cg").unwrap();
    assert_relative_eq!(cg, 0.1, max_relative = 1e-9);
    // memoized result is identical
    assert_eq!(ckt.eval_ref_param(dut, "c0", "cg").unwrap(), cg);
    // overrides win over the prim's declared defaults
    assert_relative_eq!(ckt.eval_ref_param(dut, "c0", "w").unwrap(), 2.0);
    // `c1` never overrides `m`, and the prim declares no default for it
    assert!(matches!(
        ckt.eval_ref_param(dut, "c1", "cg"),
        Err(ParamEvalError::Eval { .. })
    ));
}

#[test]
fn ref_param_requires_linked_instance() {
    let (mut ckt, top, _) = inverter_ckt();
    assert!(matches!(
        ckt.eval_ref_param(top, "x1", "w"),
        Err(ParamEvalError::Unlinked { .. })
    ));
}

#[test]
fn cyclic_params_fail() {
    let mut ckt = Ckt::new("$root");
    let root = ckt.root();
    let cell = ckt
        .add_cell(root, "c", &["p"], &[("a", "b"), ("b", "a")])
        .unwrap();
    let err = ckt.cell_ctx(cell).unwrap_err();
    assert!(matches!(err, ParamEvalError::Eval { .. }));
}

#[test]
fn division_by_zero_fails() {
    let mut ckt = Ckt::new("$root");
    let root = ckt.root();
    let cell = ckt.add_cell(root, "c", &["p"], &[("z", "1/0")]).unwrap();
    match ckt.cell_ctx(cell).unwrap_err() {
        ParamEvalError::Eval { source, .. } => {
            assert!(matches!(source, expr::ExprError::DivisionByZero(_)))
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn params_reference_earlier_declarations() {
    let mut ckt = Ckt::new("$root");
    let root = ckt.root();
    let cell = ckt
        .add_cell(root, "c", &["p"], &[("w", "2u"), ("wtot", "w*4")])
        .unwrap();
    let ctx = ckt.cell_ctx(cell).unwrap();
    assert_relative_eq!(ctx["wtot"], 8e-6);
}

#[test]
fn construction_rules() {
    let mut ckt = Ckt::new("$root");
    let root = ckt.root();
    let cell = ckt.add_cell(root, "c", &["p"], &[("w", "1")]).unwrap();

    // parameters are write-once
    assert!(matches!(
        ckt.scope_mut(cell).add_param("w", "2"),
        Err(Error::NameCollision { .. })
    ));
    // nets are get-or-insert
    ckt.scope_mut(cell).add_net("n").unwrap();
    ckt.scope_mut(cell).add_net("n").unwrap();
    assert_eq!(ckt.scope(cell).all_nets().count(), 2); // p and n
    // everything else collides
    assert!(matches!(
        ckt.scope_mut(cell).add_port("p"),
        Err(Error::NameCollision { .. })
    ));
    ckt.scope_mut(cell).add_instance("i0", "x").unwrap();
    assert!(matches!(
        ckt.scope_mut(cell).add_instance("i0", "x"),
        Err(Error::NameCollision { .. })
    ));
    assert!(matches!(
        ckt.add_cell(root, "c", &[], &[]),
        Err(Error::NameCollision { .. })
    ));

    // `m` is reserved for the multiplier parameter convention
    assert!(matches!(
        ckt.scope_mut(cell).add_net("M"),
        Err(Error::InvalidName { .. })
    ));
    assert!(matches!(
        ckt.scope_mut(cell).add_instance("m", "x"),
        Err(Error::InvalidName { .. })
    ));
    // but `m` as a *parameter* is fine
    ckt.scope_mut(cell).add_param("m", "1").unwrap();

    // the root scope declares no ports or params of its own
    assert!(matches!(
        ckt.scope_mut(root).add_port("p"),
        Err(Error::RootDeclaration { .. })
    ));
    assert!(matches!(
        ckt.scope_mut(root).add_param("w", "1"),
        Err(Error::RootDeclaration { .. })
    ));

    // write-once instance params
    let i0 = ckt.scope_mut(cell).get_instance_mut("i0").unwrap();
    i0.set_param("w", "1").unwrap();
    assert!(matches!(
        i0.set_param("w", "2"),
        Err(Error::NameCollision { .. })
    ));
}

#[test]
fn ungroup_one_level() {
    let (mut ckt, top, pinv) = inverter_ckt();
    let root = ckt.root();
    ckt.link(root).unwrap();
    ckt.ungroup(top, Some("x1"), false).unwrap();

    let scope = ckt.scope(top);
    assert!(scope.get_instance("x1").is_err());
    assert!(scope.get_instance("x2").unwrap().is_hierarchical());

    // boundary nets merged into the instance's nets, connectivity intact
    let mn = scope.get_instance("x1/mn").unwrap();
    assert!(!mn.is_hierarchical());
    let pin_nets: Vec<_> = mn
        .pins()
        .iter()
        .map(|p| (p.port().unwrap().as_str(), p.net().as_str()))
        .collect();
    assert_eq!(
        pin_nets,
        vec![("s", "vss"), ("g", "in"), ("d", "n1"), ("b", "vss")]
    );
    // no new nets: every net of pinv is one of its ports
    assert_eq!(scope.all_nets().count(), 5);

    // the expansion source is untouched
    assert!(ckt.scope(pinv).get_instance("mn").is_ok());
    assert_eq!(ckt.scope(pinv).ref_count(), 1);

    // the copied device sees the override threaded through x1
    assert_relative_eq!(ckt.eval_ref_param(top, "x1/mn", "w").unwrap(), 3.0);
}

#[test]
fn ungroup_requires_linked_instance() {
    let (mut ckt, top, _) = inverter_ckt();
    let err = ckt.ungroup(top, Some("x1"), false).unwrap_err();
    assert!(matches!(err, UngroupError::Unlinked { .. }));
}

#[test]
fn ungroup_skips_primitive_instances() {
    let (mut ckt, _, pinv) = inverter_ckt();
    let root = ckt.root();
    ckt.link(root).unwrap();
    ckt.ungroup(pinv, Some("mn"), false).unwrap();
    assert!(ckt.scope(pinv).get_instance("mn").is_ok());
}

#[test]
fn flattening_a_flat_cell_is_a_noop() {
    let (mut ckt, _, pinv) = inverter_ckt();
    let root = ckt.root();
    ckt.link(root).unwrap();
    let nets = ckt.scope(pinv).all_nets().count();
    let insts = ckt.scope(pinv).all_instances().count();
    ckt.ungroup(pinv, None, true).unwrap();
    assert_eq!(ckt.scope(pinv).all_nets().count(), nets);
    assert_eq!(ckt.scope(pinv).all_instances().count(), insts);
}

#[test]
fn flatten_preserves_connectivity_and_overrides() {
    let (mut ckt, top, pinv) = inverter_ckt();
    let root = ckt.root();
    ckt.link(root).unwrap();
    ckt.ungroup(top, None, true).unwrap();

    let names: Vec<_> = ckt
        .scope(top)
        .all_instances()
        .map(|i| i.name().as_str().to_string())
        .collect();
    assert_eq!(names, vec!["x1/mn", "x1/mp", "x2/mn", "x2/mp"]);
    assert!(ckt.scope(top).all_instances().all(|i| !i.is_hierarchical()));

    let pin_nets = |ckt: &Ckt, inst: &str| -> Vec<(String, String)> {
        ckt.scope(top)
            .get_instance(inst)
            .unwrap()
            .pins()
            .iter()
            .map(|p| (p.port().unwrap().to_string(), p.net().to_string()))
            .collect()
    };
    assert_eq!(
        pin_nets(&ckt, "x2/mn"),
        vec![
            ("s".to_string(), "vss".to_string()),
            ("g".to_string(), "n1".to_string()),
            ("d".to_string(), "out".to_string()),
            ("b".to_string(), "vss".to_string()),
        ]
    );

    // sibling occurrences evaluate independently (no shared state)
    assert_relative_eq!(ckt.eval_ref_param(top, "x1/mn", "w").unwrap(), 3.0);
    assert_relative_eq!(ckt.eval_ref_param(top, "x2/mn", "w").unwrap(), 5.0);
    assert_relative_eq!(ckt.eval_ref_param(top, "x1/mn", "l").unwrap(), 2.0);
    assert_relative_eq!(ckt.eval_ref_param(top, "x2/mn", "l").unwrap(), 2.0);
    // the shared cell's own device is not corrupted by either copy
    assert_relative_eq!(ckt.eval_ref_param(pinv, "mn", "w").unwrap(), 2.0);

    // ref-counts stay truthful across the rewrite
    assert_eq!(ckt.scope(pinv).ref_count(), 0);
    let nch = ckt.scope(root).get_prim("nch").unwrap();
    assert_eq!(ckt.scope(nch).ref_count(), 3);
}

#[test]
fn flatten_threads_contexts_through_nested_hierarchy() {
    let (mut ckt, _, _) = inverter_ckt();
    let root = ckt.root();
    let buf = ckt
        .add_cell(root, "buf", &["a", "y", "vdd", "vss"], &[])
        .unwrap();
    {
        let scope = ckt.scope_mut(buf);
        scope.add_net("mid").unwrap();
        let i1 = scope.add_instance("i1", "pinv").unwrap();
        i1.set_hierarchical(true);
        i1.set_param("w", "7").unwrap();
        i1.add_pin(None, "a");
        i1.add_pin(None, "mid");
        i1.add_pin(None, "vdd");
        i1.add_pin(None, "vss");
        let i2 = scope.add_instance("i2", "pinv").unwrap();
        i2.set_hierarchical(true);
        i2.add_pin(None, "mid");
        i2.add_pin(None, "y");
        i2.add_pin(None, "vdd");
        i2.add_pin(None, "vss");
    }
    let top2 = ckt
        .add_cell(root, "top2", &["in", "out", "vdd", "vss"], &[])
        .unwrap();
    {
        let scope = ckt.scope_mut(top2);
        let xb = scope.add_instance("xb", "buf").unwrap();
        xb.set_hierarchical(true);
        xb.add_pin(None, "in");
        xb.add_pin(None, "out");
        xb.add_pin(None, "vdd");
        xb.add_pin(None, "vss");
    }
    ckt.link(root).unwrap();
    ckt.ungroup(top2, None, true).unwrap();

    let scope = ckt.scope(top2);
    let names: Vec<_> = scope
        .all_instances()
        .map(|i| i.name().as_str().to_string())
        .collect();
    assert_eq!(
        names,
        vec!["xb/i1/mn", "xb/i1/mp", "xb/i2/mn", "xb/i2/mp"]
    );
    // the internal net of buf is uniquified by its hierarchical path
    assert!(scope.get_net("xb/mid").is_ok());

    let g_net = |inst: &str| {
        scope
            .get_instance(inst)
            .unwrap()
            .get_pin("g")
            .unwrap()
            .net()
            .to_string()
    };
    let d_net = |inst: &str| {
        scope
            .get_instance(inst)
            .unwrap()
            .get_pin("d")
            .unwrap()
            .net()
            .to_string()
    };
    assert_eq!(g_net("xb/i1/mn"), "in");
    assert_eq!(d_net("xb/i1/mn"), "xb/mid");
    assert_eq!(g_net("xb/i2/mn"), "xb/mid");
    assert_eq!(d_net("xb/i2/mn"), "out");

    // overrides thread through the copied hierarchy, defaults elsewhere
    assert_relative_eq!(ckt.eval_ref_param(top2, "xb/i1/mn", "w").unwrap(), 7.0);
    assert_relative_eq!(ckt.eval_ref_param(top2, "xb/i2/mn", "w").unwrap(), 2.0);
}
