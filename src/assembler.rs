use std::sync::{Arc};

use indexmap::{IndexMap};
use log::{debug};

use super::buffer::{AssemblyBuffer, ExecutableBuffer, Offset};
use super::config::{Config};
use super::error::{Error, Result};
use super::label::{DynamicLabel, Label, LabelRegistry, Target};
use super::litpool::{LitPool};
use super::memory::{MemoryManager};
use super::modifier::{Modifier};
use super::reloc::{Relocation, PatchLoc, ExternalSymbols, resolve_all};

/**
 * Accumulates code and data, and the labels and relocations that describe
 * it, and publishes snapshots of it as executable memory.
 *
 * Relocations are not resolved until the code is [`commit()`]ed (or
 * [`link()`]ed), so labels may be referenced before they are declared.
 * Emission may continue after a commit; each commit publishes everything
 * emitted so far, as a new [`Executor`].
 *
 * [`commit()`]: Assembler::commit
 * [`link()`]: Assembler::link
 */
#[derive(Debug)]
pub struct Assembler<R: Relocation> {
    config: Config,
    buffer: AssemblyBuffer,
    labels: LabelRegistry<R>,
    externals: ExternalSymbols,
    memory: MemoryManager,
    /** The number of successful commits. */
    commits: usize,
}

impl<R: Relocation> Assembler<R> {
    /**
     * Constructs an `Assembler` with the default [`Config`] for `R`. If
     * `R::page_size()` is not a power of two, 4KB pages are used instead.
     */
    pub fn new() -> Self {
        let mut config = Config::for_relocation::<R>();
        let memory = MemoryManager::new(config.page_size).unwrap_or_default();
        config.page_size = memory.page_size();
        Self::build(config, memory)
    }

    /** Fails with [`Error::InvalidPageSize`] if `config.page_size` is not a power of two. */
    pub fn with_config(config: Config) -> Result<Self> {
        let memory = MemoryManager::new(config.page_size)?;
        Ok(Self::build(config, memory))
    }

    fn build(config: Config, memory: MemoryManager) -> Self {
        Assembler {
            config,
            buffer: AssemblyBuffer::with_capacity(config.initial_capacity),
            labels: LabelRegistry::new(),
            externals: ExternalSymbols::new(),
            memory,
            commits: 0,
        }
    }

    pub fn config(&self) -> &Config { &self.config }

    /** The offset at which the next byte will be emitted. */
    pub fn offset(&self) -> Offset { self.buffer.current_offset() }

    /** Everything emitted so far, without relocations applied. */
    pub fn bytes(&self) -> &[u8] { self.buffer.as_bytes() }

    /** The number of successful calls to [`commit()`](Assembler::commit). */
    pub fn commits(&self) -> usize { self.commits }

    // Emission.

    pub fn push(&mut self, byte: u8) { self.buffer.push(byte); }
    pub fn push_i8(&mut self, value: i8) { self.buffer.push_i8(value); }
    pub fn push_i16(&mut self, value: i16) { self.buffer.push_i16(value); }
    pub fn push_i32(&mut self, value: i32) { self.buffer.push_i32(value); }
    pub fn push_i64(&mut self, value: i64) { self.buffer.push_i64(value); }
    pub fn push_u16(&mut self, value: u16) { self.buffer.push_u16(value); }
    pub fn push_u32(&mut self, value: u32) { self.buffer.push_u32(value); }
    pub fn push_u64(&mut self, value: u64) { self.buffer.push_u64(value); }

    /** Appends `len` copies of `byte`. */
    pub fn fill(&mut self, len: usize, byte: u8) { self.buffer.fill(len, byte); }

    /** Appends `fill` until the offset is a multiple of `alignment`. */
    pub fn align(&mut self, alignment: usize, fill: u8) { self.buffer.align(alignment, fill); }

    // Labels.

    pub fn new_dynamic_label(&mut self) -> DynamicLabel {
        self.labels.new_dynamic_label()
    }

    /** Declares static label `name` at the current offset. */
    pub fn declare_label(&mut self, name: impl Into<String>) -> Result<()> {
        let offset = self.offset();
        self.labels.declare_static(name, offset)
    }

    /** Declares `id` at the current offset. */
    pub fn declare_dynamic(&mut self, id: DynamicLabel) -> Result<()> {
        let offset = self.offset();
        self.labels.declare_dynamic(id, offset)
    }

    /** Declares local label `name` at the current offset. */
    pub fn declare_local(&mut self, name: impl Into<String>) {
        let offset = self.offset();
        self.labels.declare_local(name, offset);
    }

    pub fn place_of(&self, label: &Label) -> Option<Offset> {
        self.labels.place_of(label)
    }

    pub fn place_of_static(&self, name: &str) -> Option<Offset> {
        self.labels.place_of_static(name)
    }

    pub fn place_of_dynamic(&self, id: DynamicLabel) -> Option<Offset> {
        self.labels.place_of_dynamic(id)
    }

    pub fn labels(&self) -> &LabelRegistry<R> { &self.labels }

    /** Sets the address of external symbol `name`, returning its previous address. */
    pub fn define_external(&mut self, name: impl Into<String>, address: usize) -> Option<usize> {
        self.externals.define(name, address)
    }

    pub fn externals(&self) -> &ExternalSymbols { &self.externals }

    pub fn externals_mut(&mut self) -> &mut ExternalSymbols { &mut self.externals }

    // References.

    /**
     * Registers a relocation of a field that has already been emitted.
     *  - `field_offset` - the number of bytes back from the current offset to
     *    the start of the field.
     *  - `ref_offset` - the number of bytes back from the current offset to
     *    the point from which a relative value is measured.
     *  - `addend` - added to the address of `target`.
     *
     * Fails with [`Error::RelocationBeforeStart`], registering nothing, if
     * either distance reaches back before offset 0.
     */
    pub fn relocation(&mut self, target: Target, field_offset: u8, ref_offset: u8, addend: isize, relocation: R) -> Result<()> {
        let loc = PatchLoc::new(self.offset(), addend, field_offset, ref_offset, relocation)?;
        self.labels.register_relocation(target, loc);
        Ok(())
    }

    /**
     * Registers a relocation of the last `relocation.size()` bytes emitted,
     * which typically hold an instruction. Bits not owned by the relocation
     * are preserved.
     */
    pub fn reference_field(&mut self, target: Target, relocation: R) -> Result<()> {
        let field_offset = relocation.size() as u8;
        let ref_offset = relocation.ref_offset();
        self.relocation(target, field_offset, ref_offset, 0, relocation)
    }

    /** Appends a zeroed field for `relocation`, and registers it. */
    pub fn reference(&mut self, target: Target, relocation: R) -> Result<()> {
        self.fill(relocation.size(), 0);
        self.reference_field(target, relocation)
    }

    /** Emits `pool`. See [`LitPool::emit()`]. */
    pub fn emit_pool(&mut self, pool: LitPool) -> Result<()> {
        pool.emit(self)
    }

    // Publishing.

    /**
     * Returns everything emitted so far, with all relocations resolved as if
     * it were loaded at `base`. Nothing is mapped, and `self` is unchanged.
     */
    pub fn link(&self, base: usize) -> Result<Vec<u8>> {
        let mut code = self.buffer.clone();
        let patched = resolve_all(&mut code, base, &self.labels, &self.externals)?;
        debug!("linked {:#x} bytes at {:#x}, {} relocations", code.len(), base, patched);
        Ok(code.into_bytes())
    }

    /**
     * Copies everything emitted so far into freshly mapped memory, resolves
     * all relocations against its address, and makes it executable.
     *
     * If this fails, nothing is published and `self` is unchanged, so the
     * problem can be fixed (e.g. by declaring a missing label) and the
     * commit retried. Earlier [`Executor`]s are unaffected either way.
     */
    pub fn commit(&mut self) -> Result<Executor> {
        let mut mapping = self.memory.allocate_writable(self.buffer.len())?;
        mapping.copy_from_slice(&self.buffer);
        let base = mapping.base_address();
        let patched = resolve_all(&mut mapping, base, &self.labels, &self.externals)?;
        let code = self.memory.make_executable(mapping)?;
        self.commits += 1;
        debug!("commit {}: {:#x} bytes at {:#x}, {} relocations", self.commits, code.len(), base, patched);
        Ok(Executor::new(code, &self.labels))
    }

    /**
     * Overwrites code in place. `executor` must have been committed by
     * `self`. Its code is made writeable (and not executable), passed to
     * `f` as a [`Modifier`], and made executable again, even if `f` fails.
     * Relocations are resolved against the labels and external symbols
     * known to `self` now.
     *
     * Fails with [`Error::CodeInUse`], changing nothing, if `executor` has
     * been cloned, since a clone could be running the code. If the
     * operating system refuses to reprotect the memory, the code is lost
     * and `executor` becomes empty.
     */
    pub fn alter<F>(&self, executor: &mut Executor, f: F) -> Result<()>
    where F: FnOnce(&mut Modifier<'_, R>) -> Result<()> {
        let committed = Arc::get_mut(&mut executor.0).ok_or(Error::CodeInUse)?;
        let base = committed.code.base_address();
        let mut code = self.memory.make_writable(std::mem::take(&mut committed.code))?;
        let result = {
            let mut modifier = Modifier::new(&mut code, base, &self.labels, &self.externals);
            f(&mut modifier).and_then(|()| modifier.finish())
        };
        committed.code = self.memory.make_executable(code)?;
        let reapplied = result?;
        debug!("altered {:#x} bytes at {:#x}, {} relocations reapplied", committed.code.len(), base, reapplied);
        Ok(())
    }
}

impl<R: Relocation> Default for Assembler<R> {
    fn default() -> Self { Assembler::new() }
}

impl<R: Relocation> Extend<u8> for Assembler<R> {
    fn extend<T: IntoIterator<Item=u8>>(&mut self, iter: T) {
        self.buffer.extend(iter)
    }
}

impl<'a, R: Relocation> Extend<&'a u8> for Assembler<R> {
    fn extend<T: IntoIterator<Item=&'a u8>>(&mut self, iter: T) {
        self.buffer.extend(iter)
    }
}

//-----------------------------------------------------------------------------

#[derive(Debug)]
struct Committed {
    code: ExecutableBuffer,
    statics: IndexMap<String, Offset>,
    dynamics: Vec<Option<Offset>>,
}

/**
 * A snapshot of committed code, with the addresses of the labels declared
 * when it was committed. Cheap to clone, and can be shared between threads.
 * The code is unmapped when the last clone is dropped.
 */
#[derive(Debug, Clone)]
pub struct Executor(Arc<Committed>);

impl Executor {
    fn new<R: Relocation>(code: ExecutableBuffer, labels: &LabelRegistry<R>) -> Self {
        let statics = labels.statics().map(|(name, offset)| (name.to_owned(), offset)).collect();
        let mut dynamics = vec![None; labels.num_dynamic_labels()];
        for (id, offset) in labels.dynamics() {
            dynamics[id.get_id()] = Some(offset);
        }
        Executor(Arc::new(Committed {code, statics, dynamics}))
    }

    /** The address of the first byte of the code. */
    pub fn base_address(&self) -> usize { self.0.code.base_address() }

    pub fn len(&self) -> usize { self.0.code.len() }

    pub fn is_empty(&self) -> bool { self.0.code.is_empty() }

    /** The code, with relocations applied. */
    pub fn code(&self) -> &[u8] { &self.0.code }

    /**
     * Returns a pointer to the code at `offset`, or `None` if `offset` is
     * beyond `len()`. It remains valid as long as `self` or a clone of it is
     * alive, and the code is not altered.
     */
    pub fn ptr(&self, offset: Offset) -> Option<*const u8> { self.0.code.ptr(offset) }

    /** The address of static label `name`. */
    pub fn address_of(&self, name: &str) -> Option<usize> {
        self.0.statics.get(name).map(|offset| self.base_address() + offset.0)
    }

    /** The address of dynamic label `id`. */
    pub fn address_of_dynamic(&self, id: DynamicLabel) -> Option<usize> {
        let offset = self.0.dynamics.get(id.get_id()).copied().flatten()?;
        Some(self.base_address() + offset.0)
    }

    /** The addresses of all static labels, in order of declaration. */
    pub fn labels(&self) -> impl Iterator<Item=(&str, usize)> + '_ {
        let base = self.base_address();
        self.0.statics.iter().map(move |(name, offset)| (name.as_str(), base + offset.0))
    }
}

//-----------------------------------------------------------------------------

#[cfg(test)]
pub mod tests {
    use super::*;
    use super::super::reloc::{RelocationSize};
    use super::super::target::aarch64::{Aarch64Relocation};
    use super::super::target::x64::{X64Relocation};

    use rand::{Rng, SeedableRng};
    use rand_pcg::{Pcg64};

    type X64Assembler = Assembler<X64Relocation>;

    #[test]
    fn call_external() {
        let mut a = X64Assembler::new();
        a.define_external("target", 0x1000);
        a.declare_label("start").unwrap();
        a.push(0xE8);
        a.reference(Target::External("target".into()), X64Relocation::rel32()).unwrap();
        a.push(0x90);
        let code = a.link(0x2000).unwrap();
        let expected = (0x1000i32 - (0x2000 + 5)).to_le_bytes();
        assert_eq!(&code[1..5], &expected);
        assert_eq!(code[5], 0x90);
        assert_eq!(a.place_of(&Label::Static("start".into())), Some(Offset(0)));
        // Linking does not change anything.
        assert_eq!(a.bytes(), &[0xE8, 0, 0, 0, 0, 0x90]);
    }

    #[test]
    fn undeclared_dynamic_label() {
        let mut a = X64Assembler::new();
        let used = a.new_dynamic_label();
        let unused = a.new_dynamic_label();
        assert_ne!(used, unused);
        a.declare_dynamic(used).unwrap();
        a.push(0xC3);
        let executor = a.commit().unwrap();
        assert_eq!(executor.address_of_dynamic(used), Some(executor.base_address()));
        assert_eq!(executor.address_of_dynamic(unused), None);
    }

    #[test]
    fn duplicate_label() {
        let mut a = X64Assembler::new();
        a.declare_label("x").unwrap();
        a.push(0x90);
        match a.declare_label("x") {
            Err(Error::DuplicateLabel(Label::Static(name))) => assert_eq!(name, "x"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(a.place_of_static("x"), Some(Offset(0)));
    }

    #[test]
    fn displacement_too_large() {
        let mut a = X64Assembler::new();
        a.push(0xEB);
        a.reference(Target::Static("far".into()), X64Relocation::rel8()).unwrap();
        a.fill(1000, 0x90);
        a.declare_label("far").unwrap();
        a.push(0xC3);
        let before = a.bytes().to_vec();
        match a.commit() {
            Err(Error::ImpossibleRelocation {offset: Offset(2), target: Target::Static(name), value: 1000, ..}) => {
                assert_eq!(name, "far");
            },
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(a.bytes(), &before[..]);
        assert_eq!(a.commits(), 0);
    }

    #[test]
    fn retry_after_unresolved() {
        let mut a = X64Assembler::new();
        a.push(0xE9);
        a.reference(Target::Static("exit".into()), X64Relocation::rel32()).unwrap();
        a.push(0xE8);
        a.reference(Target::Static("exit".into()), X64Relocation::rel32()).unwrap();
        let before = a.bytes().to_vec();
        match a.commit() {
            Err(Error::UnresolvedLabel {target, references}) => {
                assert_eq!(target, Target::Static("exit".into()));
                assert_eq!(references, vec![Offset(5), Offset(10)]);
            },
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(a.bytes(), &before[..]);
        a.declare_label("exit").unwrap();
        a.push(0xC3);
        let executor = a.commit().unwrap();
        assert_eq!(&executor.code()[1..5], &5i32.to_le_bytes());
        assert_eq!(&executor.code()[6..10], &0i32.to_le_bytes());
        assert_eq!(executor.address_of("exit"), Some(executor.base_address() + 10));
    }

    #[test]
    fn commit_again() {
        let mut a = X64Assembler::new();
        a.declare_label("first").unwrap();
        a.push(0xC3);
        let first = a.commit().unwrap();
        a.declare_label("second").unwrap();
        a.push(0xE9);
        a.reference(Target::Static("first".into()), X64Relocation::rel32()).unwrap();
        let second = a.commit().unwrap();
        assert_eq!(a.commits(), 2);
        assert_eq!(first.code(), &[0xC3]);
        assert_eq!(first.address_of("second"), None);
        assert_eq!(second.len(), 6);
        assert_eq!(&second.code()[2..6], &(-6i32).to_le_bytes());
        assert_eq!(
            second.labels().collect::<Vec<_>>(),
            vec![("first", second.base_address()), ("second", second.base_address() + 1)],
        );
    }

    #[test]
    fn empty() {
        let mut a = X64Assembler::with_config(Config {page_size: 0x4000, initial_capacity: 64}).unwrap();
        assert_eq!(a.config().page_size, 0x4000);
        let executor = a.commit().unwrap();
        assert!(executor.is_empty());
        assert!(executor.ptr(Offset(0)).is_some());
        assert_eq!(executor.ptr(Offset(1)), None);
        assert_eq!(a.link(0).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn bad_page_size() {
        match X64Assembler::with_config(Config {page_size: 3000, initial_capacity: 0}) {
            Err(Error::InvalidPageSize(3000)) => {},
            other => panic!("unexpected {:?}", other.map(|a| a.config().page_size)),
        }
        assert!(X64Assembler::with_config(Config {page_size: 0, initial_capacity: 0}).is_err());
    }

    #[test]
    fn relocation_before_start() {
        let mut a = Assembler::<Aarch64Relocation>::new();
        match a.reference_field(Target::Static("x".into()), Aarch64Relocation::B) {
            Err(Error::RelocationBeforeStart {offset: Offset(0), field_offset: 4, ref_offset: 4}) => {},
            other => panic!("unexpected {:?}", other),
        }
        let mut a = X64Assembler::new();
        a.push(0xE8);
        assert!(a.reference_field(Target::Static("x".into()), X64Relocation::rel32()).is_err());
        assert!(a.relocation(Target::Static("x".into()), 0, 2, 0, X64Relocation::rel32()).is_err());
        assert!(a.labels().references().is_empty());
        // Nothing was registered, so nothing is unresolved.
        assert_eq!(a.link(0).unwrap(), vec![0xE8]);
    }

    #[test]
    fn ptr_bounds() {
        let mut a = X64Assembler::new();
        a.extend(&[0x90u8, 0xC3]);
        let executor = a.commit().unwrap();
        let base = executor.base_address();
        assert_eq!(executor.ptr(Offset(1)).map(|p| p as usize), Some(base + 1));
        // One past the end.
        assert_eq!(executor.ptr(Offset(2)).map(|p| p as usize), Some(base + 2));
        assert_eq!(executor.ptr(Offset(3)), None);
    }

    #[test]
    fn literal_pool_offset() {
        let mut a = X64Assembler::new();
        let mut pool = LitPool::new(a.new_dynamic_label());
        pool.push_u32(7);
        let entry = pool.push_u64(0x1234_5678_9ABC_DEF0);
        assert_eq!(entry, 8);
        // mov rax, [rbx + disp32]; ret
        a.extend(&[0x48u8, 0x8B, 0x83]);
        a.push_u32(0);
        a.relocation(Target::Dynamic(pool.label()), 4, 0, entry as isize, X64Relocation::pool32()).unwrap();
        a.push(0xC3);
        let label = pool.label();
        a.emit_pool(pool).unwrap();
        let pool_offset = a.place_of_dynamic(label).unwrap();
        assert_eq!(pool_offset, Offset(8));
        let expected = ((pool_offset.0 + entry) as i32).to_le_bytes();
        let low = a.link(0x1000).unwrap();
        let high = a.link(0x7654_3000).unwrap();
        assert_eq!(&low[3..7], &expected);
        assert_eq!(&high[3..7], &expected);
        assert_eq!(&low[16..24], &0x1234_5678_9ABC_DEF0u64.to_le_bytes());
        let executor = a.commit().unwrap();
        assert_eq!(&executor.code()[3..7], &expected);
    }

    /**
     * Emits random padding around a reference to a label that is declared
     * later, and checks that the reference resolves to the declaration.
     */
    #[test]
    fn random_round_trip() {
        const NUM_TESTS: usize = 100;
        let mut rng = Pcg64::seed_from_u64(0);
        for _ in 0..NUM_TESTS {
            let mut a = Assembler::<RelocationSize>::new();
            a.fill(rng.gen_range(0..100), 0x90);
            a.reference(Target::Static("l".into()), RelocationSize::DWord).unwrap();
            let source = a.offset().0;
            a.fill(rng.gen_range(0..1000), 0x90);
            a.declare_label("l").unwrap();
            let declared = a.offset().0;
            a.fill(rng.gen_range(0..100), 0x90);
            let executor = a.commit().unwrap();
            let base = executor.base_address();
            assert_eq!(executor.address_of("l"), Some(base + declared));
            let field = &executor.code()[source - 4..source];
            assert_eq!(RelocationSize::DWord.read_value(field), (declared - source) as isize);
        }
    }

    #[test]
    fn executor_is_send_and_sync() {
        fn check<T: Send + Sync>() {}
        check::<Executor>();
    }

    //-------------------------------------------------------------------------

    #[cfg(all(target_arch="x86_64", unix))]
    pub mod run {
        use super::*;

        /** Calls the code at `offset` in `executor`. */
        unsafe fn call(executor: &Executor, offset: Offset) -> u64 {
            let f: extern "C" fn() -> u64 = std::mem::transmute(executor.ptr(offset).expect("Offset beyond the code"));
            f()
        }

        #[test]
        fn constant() {
            let mut a = X64Assembler::new();
            a.extend(&[0xB8u8, 42, 0, 0, 0, 0xC3]);
            let executor = a.commit().unwrap();
            assert_eq!(unsafe { call(&executor, Offset(0)) }, 42);
        }

        #[test]
        fn altered_constant() {
            let mut a = X64Assembler::new();
            a.extend(&[0xB8u8, 42, 0, 0, 0, 0xC3]);
            let mut executor = a.commit().unwrap();
            assert_eq!(unsafe { call(&executor, Offset(0)) }, 42);
            a.alter(&mut executor, |m| {
                m.goto(Offset(1));
                m.push_u32(43)?;
                m.check(Offset(5))
            }).unwrap();
            assert_eq!(unsafe { call(&executor, Offset(0)) }, 43);
        }

        #[test]
        fn altered_jump() {
            let mut a = X64Assembler::new();
            a.push(0xE9);
            a.reference(Target::Static("one".into()), X64Relocation::rel32()).unwrap();
            a.declare_label("one").unwrap();
            a.extend(&[0xB8u8, 1, 0, 0, 0, 0xC3]);
            a.declare_label("two").unwrap();
            a.extend(&[0xB8u8, 2, 0, 0, 0, 0xC3]);
            let mut executor = a.commit().unwrap();
            assert_eq!(unsafe { call(&executor, Offset(0)) }, 1);
            a.alter(&mut executor, |m| {
                m.goto(Offset(5));
                m.reference_field(Target::Static("two".into()), X64Relocation::rel32())
            }).unwrap();
            assert_eq!(unsafe { call(&executor, Offset(0)) }, 2);
        }

        #[test]
        fn forward_jump() {
            let mut a = X64Assembler::new();
            a.extend(&[0xB8u8, 1, 0, 0, 0]);
            a.push(0xEB);
            a.reference(Target::Forward("done".into()), X64Relocation::rel8()).unwrap();
            a.extend(&[0xB8u8, 2, 0, 0, 0]);
            a.declare_local("done");
            a.push(0xC3);
            let executor = a.commit().unwrap();
            assert_eq!(unsafe { call(&executor, Offset(0)) }, 1);
        }

        #[test]
        fn literal_pool() {
            let mut a = X64Assembler::new();
            let mut pool = LitPool::new(a.new_dynamic_label());
            pool.push_u32(7);
            let big = pool.push_u64(0x1234_5678_9ABC_DEF0);
            // mov rax, [rip + pool + big]
            a.extend(&[0x48u8, 0x8B, 0x05, 0, 0, 0, 0]);
            a.relocation(Target::Dynamic(pool.label()), 4, 0, big as isize, X64Relocation::rel32()).unwrap();
            a.push(0xC3);
            a.emit_pool(pool).unwrap();
            let executor = a.commit().unwrap();
            assert_eq!(unsafe { call(&executor, Offset(0)) }, 0x1234_5678_9ABC_DEF0);
        }

        #[test]
        fn absolute_data() {
            let mut a = X64Assembler::new();
            let data = a.new_dynamic_label();
            // mov rax, data; mov rax, [rax]; ret
            a.extend(&[0x48u8, 0xB8]);
            a.reference(Target::Dynamic(data), X64Relocation::abs64()).unwrap();
            a.extend(&[0x48u8, 0x8B, 0x00, 0xC3]);
            a.align(8, 0xCC);
            a.declare_dynamic(data).unwrap();
            a.push_u64(77);
            let executor = a.commit().unwrap();
            assert_eq!(unsafe { call(&executor, Offset(0)) }, 77);
        }

        extern "C" fn add_one(x: u64) -> u64 { x + 1 }

        #[test]
        fn call_native() {
            let mut a = X64Assembler::new();
            a.define_external("add_one", add_one as usize);
            a.declare_label("entry").unwrap();
            // sub rsp, 8; mov edi, 41
            a.extend(&[0x48u8, 0x83, 0xEC, 0x08, 0xBF, 41, 0, 0, 0]);
            // mov rax, add_one; call rax
            a.extend(&[0x48u8, 0xB8]);
            a.reference(Target::External("add_one".into()), X64Relocation::abs64()).unwrap();
            a.extend(&[0xFFu8, 0xD0]);
            // add rsp, 8; ret
            a.extend(&[0x48u8, 0x83, 0xC4, 0x08, 0xC3]);
            let executor = a.commit().unwrap();
            assert_eq!(executor.address_of("entry"), Some(executor.base_address()));
            assert_eq!(unsafe { call(&executor, Offset(0)) }, 42);
        }

        #[test]
        fn shared() {
            let mut a = X64Assembler::new();
            a.extend(&[0xB8u8, 42, 0, 0, 0, 0xC3]);
            let executor = a.commit().unwrap();
            let threads: Vec<_> = (0..4).map(|_| {
                let executor = executor.clone();
                std::thread::spawn(move || unsafe { call(&executor, Offset(0)) })
            }).collect();
            drop(executor);
            for thread in threads {
                assert_eq!(thread.join().unwrap(), 42);
            }
        }
    }
}
