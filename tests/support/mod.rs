//! In-process runtime for executing emitted code in tests.
//!
//! `Runtime` starts with the `VmState` the native code sees, so every helper
//! can recover it from the `L` pointer. Helpers record what they were asked
//! to do in `events`; objects are boxed and kept alive until the runtime is
//! dropped.

#![allow(dead_code)]

use regvm_jit::bytecode::BUILTIN_COUNT;
use regvm_jit::config::EmitConfig;
use regvm_jit::layout::{
    CFunction, CallFrame, Closure, FRAME_RETURN, FastFunction, GC_BLACK_BIT, GlobalState, LuaNode,
    NativeContext, NativeProto, Proto, TKey, TString, TValue, Table, VmState, tags, tm,
};
use regvm_jit::{NativeModule, translate_module};
use std::ffi::c_void;
use std::ptr;

pub const STACK_SLOTS: usize = 256;

/// Fresh stack slots hold this value so missing nil-fills show up.
pub const STALE: f64 = -99.0;

/// Stack space given to foreign functions.
const C_STACK: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Prolog { args: isize, nresults: i32 },
    EpilogC { nresults: i32, produced: i32 },
    Resize { size: i32 },
    Barrier { table: *mut Table },
    NodeIter { index: i32 },
    NonTableLoop { ra: i32, aux: i32 },
    ForGPrep { ra: isize, pc: i32 },
    Import { aux: u32 },
    Interrupt,
}

/// One function to translate, with its prototype data.
pub struct FunctionDef {
    pub code: Vec<u32>,
    pub constants: Vec<TValue>,
    pub numparams: u8,
    pub is_vararg: bool,
    pub maxstack: u8,
}

impl FunctionDef {
    pub fn new(code: Vec<u32>) -> Self {
        Self {
            code,
            constants: Vec::new(),
            numparams: 0,
            is_vararg: false,
            maxstack: 16,
        }
    }

    pub fn constants(mut self, constants: Vec<TValue>) -> Self {
        self.constants = constants;
        self
    }

    pub fn params(mut self, numparams: u8) -> Self {
        self.numparams = numparams;
        self
    }

    pub fn vararg(mut self) -> Self {
        self.is_vararg = true;
        self
    }
}

/// Translated functions plus the prototypes and closures pointing at them.
pub struct Compiled {
    pub module: NativeModule,
    pub code: Vec<Box<[u32]>>,
    constants: Vec<Box<[TValue]>>,
    natives: Vec<Box<NativeProto>>,
    pub protos: Vec<Box<Proto>>,
    pub closures: Vec<Box<Closure>>,
}

impl Compiled {
    pub fn closure(&self, index: usize) -> TValue {
        TValue::function(&*self.closures[index] as *const Closure as *mut Closure)
    }

    /// Make function `index` look uncompiled to callers and returners.
    pub fn drop_native(&mut self, index: usize) {
        self.protos[index].exec_data = ptr::null_mut();
    }

    /// Current value of instruction word `pc` of function `index`.
    pub fn word(&self, index: usize, pc: usize) -> u32 {
        // SAFETY: native code may have rewritten the word in place.
        unsafe { ptr::read_volatile(self.code[index].as_ptr().add(pc)) }
    }

    pub fn code_ptr(&self, index: usize) -> *const u32 {
        self.code[index].as_ptr()
    }
}

#[repr(C)]
pub struct Runtime {
    pub state: VmState,
    global: Box<GlobalState>,
    native: Box<NativeContext>,
    stack: Box<[TValue]>,
    frames: Vec<Box<CallFrame>>,
    tables: Vec<Box<Table>>,
    arrays: Vec<Box<[TValue]>>,
    nodes: Vec<Box<[LuaNode]>>,
    strings: Vec<Box<TString>>,
    c_closures: Vec<Box<Closure>>,
    pub env: *mut Table,
    pub events: Vec<Event>,
    /// Argument lists seen by `record_args`.
    pub recorded: Vec<Vec<TValue>>,
    /// Interrupt callbacks left before the thread is marked as errored.
    pub interrupts_left: u32,
}

impl Runtime {
    pub fn new() -> Box<Self> {
        let mut stack: Box<[TValue]> = vec![TValue::number(STALE); STACK_SLOTS].into();
        let stack_ptr = stack.as_mut_ptr();

        let mut global = Box::new(GlobalState {
            interrupt: None,
            tmname: [ptr::null_mut(); tm::COUNT],
        });
        let global_ptr = &mut *global as *mut GlobalState;

        let native = Box::new(NativeContext {
            call_prolog,
            call_epilog_c,
            resize_array,
            barrier_back,
            get_fast_tm,
            forg_loop_node_iter,
            forg_loop_non_table_fallback,
            forg_prep_fallback,
            get_import,
            fast_functions: [None; BUILTIN_COUNT],
        });

        let mut rt = Box::new(Runtime {
            state: VmState {
                top: stack_ptr,
                base: stack_ptr,
                ci: ptr::null_mut(),
                stack: stack_ptr,
                // SAFETY: the stack is never empty.
                stack_last: unsafe { stack_ptr.add(STACK_SLOTS - 1) },
                global: global_ptr,
                status: 0,
            },
            global,
            native,
            stack,
            frames: Vec::new(),
            tables: Vec::new(),
            arrays: Vec::new(),
            nodes: Vec::new(),
            strings: Vec::new(),
            c_closures: Vec::new(),
            env: ptr::null_mut(),
            events: Vec::new(),
            recorded: Vec::new(),
            interrupts_left: 0,
        });
        let env = rt.table(&[]);
        // SAFETY: just allocated.
        unsafe { (*env).safeenv = 1 };
        rt.env = env;
        rt
    }

    pub fn set_fast_function(&mut self, id: u8, f: FastFunction) {
        self.native.fast_functions[id as usize] = Some(f);
    }

    /// Install the interrupt callback; the thread errors after `count` calls.
    pub fn set_interrupt(&mut self, count: u32) {
        self.interrupts_left = count;
        self.global.interrupt = Some(interrupt);
    }

    pub fn compile(&mut self, defs: Vec<FunctionDef>, config: &EmitConfig) -> Compiled {
        let streams: Vec<&[u32]> = defs.iter().map(|d| d.code.as_slice()).collect();
        let module = translate_module(&streams, config)
            .unwrap()
            .finalize()
            .unwrap();

        let mut compiled = Compiled {
            module,
            code: Vec::new(),
            constants: Vec::new(),
            natives: Vec::new(),
            protos: Vec::new(),
            closures: Vec::new(),
        };

        for (i, def) in defs.into_iter().enumerate() {
            let mut code: Box<[u32]> = def.code.into();
            let mut constants = def.constants;
            if constants.is_empty() {
                constants.push(TValue::NIL);
            }
            let mut constants: Box<[TValue]> = constants.into();
            let mut native = Box::new(compiled.module.function(i).unwrap().native_proto());

            let mut proto = Box::new(Proto {
                k: constants.as_mut_ptr(),
                code: code.as_mut_ptr(),
                exec_data: &mut *native,
                sizecode: code.len() as i32,
                sizek: constants.len() as i32,
                numparams: def.numparams,
                is_vararg: def.is_vararg as u8,
                maxstacksize: def.maxstack,
            });
            let closure = Box::new(Closure {
                marked: 0,
                is_c: 0,
                nupvalues: 0,
                stacksize: def.maxstack,
                env: self.env,
                proto: &mut *proto,
                cfunction: None,
            });

            compiled.code.push(code);
            compiled.constants.push(constants);
            compiled.natives.push(native);
            compiled.protos.push(proto);
            compiled.closures.push(closure);
        }
        compiled
    }

    /// A foreign function value.
    pub fn c_function(&mut self, f: CFunction) -> TValue {
        let mut closure = Box::new(Closure {
            marked: 0,
            is_c: 1,
            nupvalues: 0,
            stacksize: 0,
            env: self.env,
            proto: ptr::null_mut(),
            cfunction: Some(f),
        });
        let value = TValue::function(&mut *closure);
        self.c_closures.push(closure);
        value
    }

    /// A table with the given array part and one empty hash node.
    pub fn table(&mut self, array: &[TValue]) -> *mut Table {
        self.table_with_node(array, LuaNode {
            val: TValue::NIL,
            key: TKey::new(tags::NIL, 0, 0),
        })
    }

    pub fn table_with_node(&mut self, array: &[TValue], node: LuaNode) -> *mut Table {
        let mut array: Box<[TValue]> = array.into();
        let mut nodes: Box<[LuaNode]> = vec![node].into();
        let mut table = Box::new(Table {
            marked: 0,
            tmcache: 0,
            readonly: 0,
            safeenv: 0,
            lsizenode: 0,
            nodemask8: 0,
            sizearray: array.len() as i32,
            array: array.as_mut_ptr(),
            node: nodes.as_mut_ptr(),
            metatable: ptr::null_mut(),
            gclist: ptr::null_mut(),
        });
        let t = &mut *table as *mut Table;
        self.arrays.push(array);
        self.nodes.push(nodes);
        self.tables.push(table);
        t
    }

    pub fn make_black(&mut self, t: *mut Table) {
        // SAFETY: tables handed out by this runtime stay alive.
        unsafe { (*t).marked |= 1 << GC_BLACK_BIT };
    }

    pub fn array(&self, t: *mut Table) -> Vec<TValue> {
        // SAFETY: tables handed out by this runtime stay alive.
        unsafe { std::slice::from_raw_parts((*t).array, (*t).sizearray as usize).to_vec() }
    }

    pub fn string(&mut self, hash: u32) -> *mut TString {
        let mut s = Box::new(TString {
            marked: 0,
            hash,
            len: 0,
            data: ptr::null(),
        });
        let p = &mut *s as *mut TString;
        self.strings.push(s);
        p
    }

    /// Enter function `index` through the gate with `regs` as its first
    /// registers. Returns the gate's result.
    ///
    /// Slot 0 holds the function; its registers start at slot 1, and
    /// returned values land from slot 0 on.
    pub fn run(&mut self, compiled: &Compiled, index: usize, regs: &[TValue], nresults: i32) -> i32 {
        let stack = self.stack.as_mut_ptr();
        self.stack[0] = compiled.closure(index);
        self.stack[1..1 + regs.len()].copy_from_slice(regs);

        // SAFETY: all pointers stay inside the stack.
        let (base, top) = unsafe {
            let base = stack.add(1);
            (base, base.add(compiled.protos[index].maxstacksize as usize))
        };

        let outer = self.push_frame(CallFrame {
            base: stack,
            func: stack,
            top: base,
            savedpc: ptr::null(),
            prev: ptr::null_mut(),
            nresults: 0,
            flags: 0,
        });
        let entry = self.push_frame(CallFrame {
            base,
            func: stack,
            top,
            savedpc: compiled.code_ptr(index),
            prev: outer,
            nresults,
            flags: FRAME_RETURN,
        });
        self.state.ci = entry;
        self.state.base = base;
        self.state.top = top;
        self.state.status = 0;

        let gate = compiled.module.entry();
        let function = compiled.module.function(index).unwrap();
        let proto = &*compiled.protos[index] as *const Proto as *mut Proto;
        let native = &mut *self.native as *mut NativeContext;
        let l = self as *mut Runtime as *mut VmState;
        // SAFETY: the module was emitted for this runtime layout.
        unsafe { gate(l, proto, function.entry_target(), native) }
    }

    pub fn slot(&self, i: usize) -> TValue {
        self.stack[i]
    }

    /// Register `r` of the frame entered by `run`.
    pub fn reg(&self, r: usize) -> TValue {
        self.stack[1 + r]
    }

    /// Stack top as a slot index.
    pub fn top(&self) -> usize {
        // SAFETY: top always points into the stack.
        unsafe { self.state.top.offset_from(self.stack.as_ptr()) as usize }
    }

    pub fn current_frame(&self) -> &CallFrame {
        // SAFETY: frames are kept alive by the runtime.
        unsafe { &*self.state.ci }
    }

    fn push_frame(&mut self, frame: CallFrame) -> *mut CallFrame {
        let mut frame = Box::new(frame);
        let p = &mut *frame as *mut CallFrame;
        self.frames.push(frame);
        p
    }
}

/// SAFETY: `l` must be the state of a live `Runtime`.
unsafe fn runtime<'a>(l: *mut VmState) -> &'a mut Runtime {
    unsafe { &mut *(l as *mut Runtime) }
}

unsafe extern "C" fn call_prolog(
    l: *mut VmState,
    func: *mut TValue,
    argtop: *mut TValue,
    nresults: i32,
) -> *mut Closure {
    unsafe {
        let rt = runtime(l);
        let cl = (*func).value as *mut Closure;
        let base = func.add(1);
        rt.events.push(Event::Prolog {
            args: argtop.offset_from(base),
            nresults,
        });

        let (top, savedpc) = if (*cl).is_c & 1 != 0 {
            (argtop.add(C_STACK), ptr::null())
        } else {
            let p = (*cl).proto;
            (base.add((*p).maxstacksize as usize), (*p).code as *const u32)
        };
        let prev = rt.state.ci;
        rt.state.ci = rt.push_frame(CallFrame {
            base,
            func,
            top,
            savedpc,
            prev,
            nresults,
            flags: 0,
        });
        rt.state.base = base;
        rt.state.top = argtop;
        cl
    }
}

unsafe extern "C" fn call_epilog_c(l: *mut VmState, nresults: i32, produced: i32) {
    unsafe {
        let rt = runtime(l);
        rt.events.push(Event::EpilogC { nresults, produced });

        let ci = rt.state.ci;
        let mut res = (*ci).func;
        let mut vali = rt.state.top.sub(produced as usize);
        let wanted = if nresults < 0 { produced } else { nresults };
        for i in 0..wanted {
            *res = if i < produced { *vali } else { TValue::NIL };
            res = res.add(1);
            vali = vali.add(1);
        }

        let cip = (*ci).prev;
        rt.state.ci = cip;
        rt.state.base = (*cip).base;
        rt.state.top = if nresults < 0 { res } else { (*cip).top };
    }
}

unsafe extern "C" fn resize_array(l: *mut VmState, t: *mut Table, size: i32) {
    unsafe {
        let rt = runtime(l);
        rt.events.push(Event::Resize { size });

        let old = std::slice::from_raw_parts((*t).array, (*t).sizearray as usize);
        let mut array: Box<[TValue]> = vec![TValue::NIL; size as usize].into();
        let keep = old.len().min(array.len());
        array[..keep].copy_from_slice(&old[..keep]);
        (*t).array = array.as_mut_ptr();
        (*t).sizearray = size;
        rt.arrays.push(array);
    }
}

unsafe extern "C" fn barrier_back(l: *mut VmState, t: *mut Table, gclist: *mut *mut c_void) {
    unsafe {
        let rt = runtime(l);
        assert_eq!(gclist, &raw mut (*t).gclist);
        rt.events.push(Event::Barrier { table: t });
        (*t).marked &= !(1 << GC_BLACK_BIT);
    }
}

/// Test metatables keep their `__index` value in array slot 0.
unsafe extern "C" fn get_fast_tm(mt: *mut Table, _event: i32, _name: *mut TString) -> *const TValue {
    unsafe {
        if mt.is_null() || (*mt).sizearray < 1 {
            ptr::null()
        } else {
            (*mt).array
        }
    }
}

unsafe extern "C" fn forg_loop_node_iter(
    l: *mut VmState,
    _t: *mut Table,
    index: i32,
    _ra: *mut TValue,
) -> bool {
    unsafe { runtime(l).events.push(Event::NodeIter { index }) };
    false
}

unsafe extern "C" fn forg_loop_non_table_fallback(l: *mut VmState, ra: i32, aux: i32) -> bool {
    unsafe { runtime(l).events.push(Event::NonTableLoop { ra, aux }) };
    false
}

unsafe extern "C" fn forg_prep_fallback(l: *mut VmState, ra: *mut TValue, pc: i32) {
    unsafe {
        let rt = runtime(l);
        rt.events.push(Event::ForGPrep {
            ra: ra.offset_from(rt.state.base),
            pc,
        });
        // Builtin table traversal starts before the first array slot
        *ra.add(2) = TValue::light_userdata(0);
    }
}

/// Pushes `aux` as a number.
unsafe extern "C" fn get_import(
    l: *mut VmState,
    _env: *mut Table,
    _k: *mut TValue,
    aux: u32,
    propagate_nil: bool,
) {
    unsafe {
        let rt = runtime(l);
        assert!(!propagate_nil);
        rt.events.push(Event::Import { aux });
        *rt.state.top = TValue::number(aux as f64);
        rt.state.top = rt.state.top.add(1);
    }
}

unsafe extern "C" fn interrupt(l: *mut VmState, _gc: i32) {
    unsafe {
        let rt = runtime(l);
        rt.events.push(Event::Interrupt);
        rt.interrupts_left = rt.interrupts_left.saturating_sub(1);
        if rt.interrupts_left == 0 {
            rt.state.status = 1;
        }
    }
}

// ==================== Foreign functions ====================

/// Records its arguments and returns nothing.
pub unsafe extern "C" fn record_args(l: *mut VmState) -> i32 {
    unsafe {
        let rt = runtime(l);
        let n = rt.state.top.offset_from(rt.state.base) as usize;
        let args = std::slice::from_raw_parts(rt.state.base, n).to_vec();
        rt.recorded.push(args);
    }
    0
}

/// Returns 1, 2, 3.
pub unsafe extern "C" fn push_three(l: *mut VmState) -> i32 {
    unsafe {
        let rt = runtime(l);
        for i in 1..=3 {
            *rt.state.top = TValue::number(i as f64);
            rt.state.top = rt.state.top.add(1);
        }
    }
    3
}

/// Returns -1.0; stands in for the generic path of a builtin.
pub unsafe extern "C" fn push_marker(l: *mut VmState) -> i32 {
    unsafe {
        let rt = runtime(l);
        *rt.state.top = TValue::number(-1.0);
        rt.state.top = rt.state.top.add(1);
    }
    1
}

/// Returns nothing.
pub unsafe extern "C" fn push_nothing(_l: *mut VmState) -> i32 {
    0
}

/// Signals an error.
pub unsafe extern "C" fn raise(_l: *mut VmState) -> i32 {
    -1
}

// ==================== Fast functions ====================

pub unsafe extern "C" fn fast_max(
    _l: *mut VmState,
    res: *mut TValue,
    arg0: *mut TValue,
    _nresults: i32,
    args: *const TValue,
    nparams: i32,
) -> i32 {
    unsafe {
        if nparams < 2 {
            return -1;
        }
        match ((*arg0).as_number(), (*args).as_number()) {
            (Some(a), Some(b)) => {
                *res = TValue::number(a.max(b));
                1
            }
            _ => -1,
        }
    }
}

pub unsafe extern "C" fn fast_sqrt(
    _l: *mut VmState,
    res: *mut TValue,
    arg0: *mut TValue,
    _nresults: i32,
    _args: *const TValue,
    nparams: i32,
) -> i32 {
    unsafe {
        match (*arg0).as_number() {
            Some(x) if nparams >= 1 => {
                *res = TValue::number(x.sqrt());
                1
            }
            _ => -1,
        }
    }
}
