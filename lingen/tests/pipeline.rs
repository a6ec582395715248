use arith::Fp64;
use grid::{Grid, spawn_grid};
use lingen::{
    CoeffRead, EFromA, FileInput, FileOutput, Gather, GatherGrid, GatherReverseGrid, GridMatPoly,
    MatPoly, MulHint, RandomInput, Scatter, ScatterGrid, TreeStats, mp_grid, mul_grid, pipe,
};
use sampling::source::Source;

const P: u64 = 0xffffffff00000001;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn field() -> Fp64 {
    Fp64::new(P).unwrap()
}

fn random_matpoly(m: usize, n: usize, len: usize, seed: u8) -> MatPoly<Fp64> {
    let mut a: MatPoly<Fp64> = MatPoly::new(field(), m, n, len);
    a.zero_pad(len);
    let mut source: Source = Source::new([seed; 32]);
    a.fill_random(0, len, &mut source);
    a
}

#[test]
fn file_round_trip_via_pipe() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let g = Grid::solo();
    let mut src: MatPoly<Fp64> = random_matpoly(2, 3, 21, 71);
    // leading zeroes must survive the conversion
    for k in 0..4 {
        for i in 0..2 {
            for j in 0..3 {
                *src.coeff_mut(i, j, k) = 0;
            }
        }
    }

    for ascii in [false, true] {
        let path = dir.path().join(if ascii { "f.txt" } else { "f.bin" });
        {
            let mut input = Gather::new(&g, &src).with_window(5);
            let mut output = FileOutput::new(&g, field(), 2, 3, &path, ascii);
            pipe(&g, &mut input, &mut output, Some("writing"), true).unwrap();
        }
        let mut back: MatPoly<Fp64> = MatPoly::new(field(), 2, 3, 0);
        {
            let mut input = FileInput::open(&g, field(), 2, 3, &path, ascii, None).unwrap();
            let mut output = Scatter::new(&g, &mut back).with_window(4);
            pipe(&g, &mut input, &mut output, Some("reading"), false).unwrap();
        }
        assert_eq!(back.size(), src.get_true_nonzero_size());
        for i in 0..2 {
            for j in 0..3 {
                assert_eq!(
                    back.part(i, j),
                    &src.part(i, j)[..back.size()],
                    "ascii = {}",
                    ascii
                );
            }
        }
    }
}

#[test]
fn mesh_multiply_matches_the_local_reference() {
    let oks: Vec<bool> = spawn_grid(2, 2, |g| {
        let field: Fp64 = field();
        // identical payload at every worker keeps the test simple; only
        // the root copy is authoritative
        let a_full: MatPoly<Fp64> = random_matpoly(4, 4, 6, 73);
        let b_full: MatPoly<Fp64> = random_matpoly(4, 4, 5, 74);
        let want_mul: MatPoly<Fp64> = MatPoly::mul_basecase(&a_full, &b_full);

        let mut a_g: GridMatPoly<Fp64> = GridMatPoly::new(&g, field, 4, 4, 6);
        a_g.zero_pad(6);
        a_g.scatter_partial(&g, &a_full, 0, 0, 6);
        let mut b_g: GridMatPoly<Fp64> = GridMatPoly::new(&g, field, 4, 4, 5);
        b_g.zero_pad(5);
        b_g.scatter_partial(&g, &b_full, 0, 0, 5);

        let mut ok: bool = true;
        let mut stats: TreeStats = TreeStats::new();

        // generous, tight and starved budgets must agree on the result,
        // only the execution (and communication) path differs
        for ram in [usize::MAX, 2000usize, 1] {
            let mut hint: MulHint = MulHint::new([usize::MAX; 3], ram);
            let mut c_g: GridMatPoly<Fp64> = GridMatPoly::new(&g, field, 4, 4, 0);
            mul_grid(&mut stats, &g, &mut c_g, &a_g, &b_g, Some(&mut hint)).unwrap();

            let mut c_full: MatPoly<Fp64> = MatPoly::new(field, 4, 4, 10);
            c_full.zero_pad(10);
            c_g.gather_partial(&g, &mut c_full, 0, 0, 10);
            if g.is_root() {
                for i in 0..4 {
                    for j in 0..4 {
                        ok &= c_full.part(i, j) == want_mul.part(i, j);
                    }
                }
            }
        }

        // middle product over the mesh: |b_full| <= |a_full|, so the short
        // operand goes first; the result is a window of the full product
        let want_ba: MatPoly<Fp64> = MatPoly::mul_basecase(&b_full, &a_full);
        let mut c_g: GridMatPoly<Fp64> = GridMatPoly::new(&g, field, 4, 4, 0);
        mp_grid(&mut stats, &g, &mut c_g, &b_g, &a_g, None).unwrap();
        let mp_len: usize = 6 - 5 + 1;
        let mut c_full: MatPoly<Fp64> = MatPoly::new(field, 4, 4, mp_len);
        c_full.zero_pad(mp_len);
        c_g.gather_partial(&g, &mut c_full, 0, 0, mp_len);
        if g.is_root() {
            for i in 0..4 {
                for j in 0..4 {
                    for k in 0..mp_len {
                        ok &= c_full.coeff(i, j, k) == want_ba.coeff(i, j, k + 4);
                    }
                }
            }
        }

        // endpoint views over the sharded result: pipe it out, and read it
        // reversed
        let mut via_pipe: MatPoly<Fp64> = MatPoly::new(field, 4, 4, 0);
        {
            let mut input = GatherGrid::new(&g, &c_g);
            let mut output = Scatter::new(&g, &mut via_pipe);
            pipe(&g, &mut input, &mut output, None, false).unwrap();
        }
        if g.is_root() {
            ok &= via_pipe.size() == mp_len;
            for i in 0..4 {
                for j in 0..4 {
                    ok &= via_pipe.part(i, j) == &c_full.part(i, j)[..mp_len];
                }
            }
        }

        let mut rev: MatPoly<Fp64> = MatPoly::new(field, 4, 4, 4);
        rev.zero_pad(4);
        let mut reversed = GatherReverseGrid::new(&g, &c_g);
        let got: usize = reversed.read(&mut rev, 0, 4).unwrap();
        ok &= got == mp_len;
        if g.is_root() {
            for i in 0..4 {
                for j in 0..4 {
                    for k in 0..mp_len {
                        ok &= rev.coeff(i, j, k) == c_full.coeff(i, j, mp_len - 1 - k);
                    }
                }
            }
        }

        // and back in through the collective scatter
        let mut round: GridMatPoly<Fp64> = GridMatPoly::new(&g, field, 4, 4, 0);
        {
            let mut input = Gather::new(&g, &c_full);
            let mut output = ScatterGrid::new(&g, &mut round);
            pipe(&g, &mut input, &mut output, None, false).unwrap();
        }
        ok &= round.size() == mp_len;
        for i in 0..round.cell_rows() {
            for j in 0..round.cell_cols() {
                ok &= round.my_cell().part(i, j) == c_g.my_cell().part(i, j);
            }
        }
        ok
    });
    assert!(oks.into_iter().all(|ok| ok));
}

#[test]
fn mesh_bootstrap_agrees_with_the_solo_run() {
    init_tracing();
    let (m, n, nrhs, len) = (3usize, 2usize, 1usize, 20usize);
    let seed: [u8; 32] = [77u8; 32];

    // single-worker reference
    let solo = Grid::solo();
    let mut solo_wrapper = EFromA::new(
        &solo,
        field(),
        nrhs,
        RandomInput::new(&solo, field(), m, n, len, seed),
    );
    solo_wrapper.initial_read().unwrap();
    let want_f0 = solo_wrapper.f0().clone();
    let mut want_e: MatPoly<Fp64> = MatPoly::new(field(), m, m + n, len + 8);
    want_e.zero_pad(len + 8);
    let mut want_total: usize = 0;
    loop {
        let got: usize = solo_wrapper
            .read(&mut want_e, want_total, want_total + 4)
            .unwrap();
        want_total += got;
        if got < 4 {
            break;
        }
    }

    let oks: Vec<bool> = spawn_grid(2, 2, |g| {
        let mut wrapper = EFromA::new(
            &g,
            field(),
            nrhs,
            RandomInput::new(&g, field(), m, n, len, seed),
        );
        wrapper.initial_read().unwrap();
        // every worker's descriptor bookkeeping must agree
        if wrapper.f0() != &want_f0 {
            return false;
        }

        let mut e: MatPoly<Fp64> = MatPoly::new(field(), m, m + n, len + 8);
        e.zero_pad(len + 8);
        let mut total: usize = 0;
        loop {
            let got: usize = wrapper.read(&mut e, total, total + 4).unwrap();
            total += got;
            if got < 4 {
                break;
            }
        }
        if total != want_total {
            return false;
        }
        if !g.is_root() {
            return true;
        }
        (0..m).all(|i| (0..m + n).all(|j| e.part(i, j) == want_e.part(i, j)))
    });
    assert!(oks.into_iter().all(|ok| ok));
}
