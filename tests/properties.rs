//! Property tests over random problem sizes and parameter values.

use looptune::codegen::c::render_stmts;
use looptune::exec::{Interpreter, Workspace};
use looptune::frontend::{parse, AnnotatedSource, Lexer, Parser};
use looptune::ir::LoopNest;
use looptune::space::{evaluate_bool, Configuration};
use looptune::transform::realize;
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// A file with one region and single-valued parameters.
fn annotated(params: &[(&str, i64)], transform: &str, code: &str) -> AnnotatedSource {
    let decls: String = params.iter().map(|(n, v)| format!("    param {}[] = [{}];\n", n, v)).collect();
    let text = format!(
        "/*@ begin PerfTuning (\n  def performance_params {{\n{}  }}\n) @*/\n/*@ begin Loop (\n  {}\n  {}\n) @*/\n/*@ end @*/\n/*@ end @*/\n",
        decls, transform, code
    );
    parse(&text).unwrap()
}

fn single_config(source: &AnnotatedSource) -> Configuration {
    source.tuning.space.configurations().next().unwrap()
}

fn run(nest: &LoopNest, ws: Workspace) -> Workspace {
    Interpreter::new().run(nest, ws).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn sampled_configurations_satisfy_constraints(hi in 2i64..12, limit in 1i64..60, seed in any::<u64>()) {
        let text = format!(
            "/*@ begin PerfTuning (\n  def performance_params {{\n    param A[] = range(1,{hi});\n    param B[] = range(1,{hi});\n    constraint area = (A * B <= {limit});\n    constraint even = (A == 1 or A % 2 == 0);\n  }}\n) @*/\n/*@ begin Loop ( x = 1; ) @*/\n/*@ end @*/\n/*@ end @*/\n"
        );
        let source = parse(&text).unwrap();
        let space = &source.tuning.space;
        let mut rng = StdRng::seed_from_u64(seed);
        for _ in 0..10 {
            let config = space.sample(&mut rng, 10_000).unwrap();
            let bindings = config.to_bindings();
            let env = |name: &str| bindings.get(name).cloned();
            for c in space.constraints() {
                prop_assert!(evaluate_bool(&c.expr, &env).unwrap(), "{} violates {}", config, c.name);
            }
            let near = space.perturb(&config, &mut rng, 10_000).unwrap();
            prop_assert!(space.is_valid(&near));
        }
        for config in space.configurations() {
            prop_assert!(space.is_valid(&config));
        }
    }

    #[test]
    fn transformed_nests_compute_the_same(n in 1usize..14, t in 1i64..9, u in 1i64..5, scalar in any::<bool>()) {
        let source = annotated(
            &[("T", t), ("U", u), ("SR", scalar as i64)],
            "transform Composite(tile=[('i',T,'ii'),('j',T,'jj')], unrolljam=(['i','j'],[U,U]), scalarreplace=(SR,'double'))",
            "for (i=0; i<=N-1; i++) for (j=0; j<=N-1; j++) for (k=0; k<=N-1; k++) C[i][j] = C[i][j] + A[i][k]*B[k][j];",
        );
        let region = &source.regions[0].nest;
        let realized = realize(region, &single_config(&source)).unwrap();
        prop_assert!(!realized.has_transforms());

        let mut ws = Workspace::new();
        ws.set_int("N", n as i64);
        for (name, seed) in [("A", 1), ("B", 2), ("C", 3)] {
            ws.alloc_random(name, &[n, n], seed);
        }
        let expected = run(&region.without_transforms(), ws.clone());
        let actual = run(&realized, ws);
        prop_assert_eq!(expected.array("C"), actual.array("C"));
    }

    #[test]
    fn parsing_is_idempotent(n in 1i64..100, step in 1i64..4, offset in 0i64..3) {
        let code = format!(
            "for (i={offset}; i<={n}-1; i+={step}) {{ for (j=0; j<=i; j++) a[i][j] = a[i][j] + b[j]*2; s = s + a[i][i]; }}"
        );
        let parse_code = |src: &str| Parser::new(Lexer::new(src)).unwrap().parse_loop_code().unwrap();
        let first = parse_code(&code);
        prop_assert_eq!(&first, &parse_code(&code));
        let rendered = render_stmts(&first);
        let second = parse_code(&rendered);
        prop_assert_eq!(&rendered, &render_stmts(&second));
        prop_assert_eq!(first, second);
    }

    #[test]
    fn tiling_keeps_iteration_order(n in 1usize..40, t in 1i64..12) {
        // s depends on the exact visiting order of i
        let source = annotated(
            &[("T", t)],
            "transform Composite(tile=[('i',T,'ii')])",
            "for (i=0; i<=N-1; i++) { s = s*0.5 + i; a[i] = s; }",
        );
        let region = &source.regions[0].nest;
        let realized = realize(region, &single_config(&source)).unwrap();

        let mut ws = Workspace::new();
        ws.set_int("N", n as i64);
        ws.set_float("s", 0.0);
        ws.alloc_zero("a", &[n]);
        let expected = run(&region.without_transforms(), ws.clone());
        let actual = run(&realized, ws);
        prop_assert_eq!(expected.array("a"), actual.array("a"));
        prop_assert_eq!(expected.scalar("s"), actual.scalar("s"));
    }

    #[test]
    fn unrolled_iterations_run_exactly_once(n in 0usize..30, lower in 0usize..5, u in 1i64..9) {
        let source = annotated(
            &[("U", u)],
            "transform Composite(unrolljam=(['i'],[U]))",
            &format!("for (i={lower}; i<=N-1; i++) a[i] = a[i] + 1;"),
        );
        let realized = realize(&source.regions[0].nest, &single_config(&source)).unwrap();

        let size = n.max(lower) + 1;
        let mut ws = Workspace::new();
        ws.set_int("N", n as i64);
        ws.alloc_zero("a", &[size]);
        let out = run(&realized, ws);
        let a = out.array("a").unwrap();
        for (i, v) in a.iter().enumerate() {
            let expected = if i >= lower && i < n { 1.0 } else { 0.0 };
            prop_assert_eq!(*v, expected, "a[{}]", i);
        }
    }
}
