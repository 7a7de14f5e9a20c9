//! Memory layout of the runtime structures touched by emitted code.
//!
//! These `#[repr(C)]` definitions are the single source of truth for every
//! field offset the emitters use. Emitters never spell raw displacements;
//! they go through the per-structure offset modules below, which are derived
//! from the struct definitions with `offset_of!`.

use std::ffi::c_void;
use std::mem::{offset_of, size_of};

use crate::bytecode::BUILTIN_COUNT;

/// Value type tags stored in `TValue::tt`.
pub mod tags {
    pub const NIL: i32 = 0;
    pub const BOOLEAN: i32 = 1;
    pub const LIGHTUSERDATA: i32 = 2;
    pub const NUMBER: i32 = 3;
    pub const VECTOR: i32 = 4;
    pub const STRING: i32 = 5;
    pub const TABLE: i32 = 6;
    pub const FUNCTION: i32 = 7;
    pub const USERDATA: i32 = 8;
    pub const THREAD: i32 = 9;

    /// Tags at or above this value refer to collectable heap objects.
    pub const FIRST_COLLECTABLE: i32 = STRING;
}

/// Tag-method events with a fast absence cache in `Table::tmcache`.
pub mod tm {
    pub const INDEX: i32 = 0;
    pub const NEWINDEX: i32 = 1;
    pub const MODE: i32 = 2;
    pub const NAMECALL: i32 = 3;
    pub const CALL: i32 = 4;
    pub const ITER: i32 = 5;
    pub const LEN: i32 = 6;
    pub const EQ: i32 = 7;

    pub const COUNT: usize = 8;
}

/// A tagged value: 8-byte payload, 4 spare bytes, 4-byte tag.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TValue {
    pub value: u64,
    pub extra: i32,
    pub tt: i32,
}

pub const TVALUE_SIZE: i32 = size_of::<TValue>() as i32;
pub const TVALUE_SIZE_LOG2: u8 = 4;

impl TValue {
    pub const NIL: TValue = TValue {
        value: 0,
        extra: 0,
        tt: tags::NIL,
    };

    pub fn boolean(b: bool) -> Self {
        TValue {
            value: b as u64,
            extra: 0,
            tt: tags::BOOLEAN,
        }
    }

    pub fn number(n: f64) -> Self {
        TValue {
            value: n.to_bits(),
            extra: 0,
            tt: tags::NUMBER,
        }
    }

    pub fn light_userdata(p: usize) -> Self {
        TValue {
            value: p as u64,
            extra: 0,
            tt: tags::LIGHTUSERDATA,
        }
    }

    pub fn string(s: *mut TString) -> Self {
        TValue {
            value: s as u64,
            extra: 0,
            tt: tags::STRING,
        }
    }

    pub fn table(t: *mut Table) -> Self {
        TValue {
            value: t as u64,
            extra: 0,
            tt: tags::TABLE,
        }
    }

    pub fn function(cl: *mut Closure) -> Self {
        TValue {
            value: cl as u64,
            extra: 0,
            tt: tags::FUNCTION,
        }
    }

    pub fn is_nil(&self) -> bool {
        self.tt == tags::NIL
    }

    /// A value is falsy iff it is nil or boolean false.
    pub fn is_falsy(&self) -> bool {
        self.tt == tags::NIL || (self.tt == tags::BOOLEAN && self.value as u32 == 0)
    }

    pub fn as_number(&self) -> Option<f64> {
        (self.tt == tags::NUMBER).then(|| f64::from_bits(self.value))
    }

    pub fn is_collectable(&self) -> bool {
        self.tt >= tags::FIRST_COLLECTABLE
    }
}

/// Interned string header. Only the hash is read by emitted code.
#[repr(C)]
#[derive(Debug)]
pub struct TString {
    pub marked: u8,
    pub hash: u32,
    pub len: u32,
    pub data: *const u8,
}

/// Hash part key: payload, spare word, and a packed `tt:4 | next:28` word.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct TKey {
    pub value: u64,
    pub extra: i32,
    pub tt_next: i32,
}

pub const TKEY_TAG_MASK: i32 = 0xf;
pub const TKEY_NEXT_SHIFT: u8 = 4;

impl TKey {
    pub fn new(tt: i32, value: u64, next: i32) -> Self {
        TKey {
            value,
            extra: 0,
            tt_next: (tt & TKEY_TAG_MASK) | (next << TKEY_NEXT_SHIFT),
        }
    }

    pub fn tt(&self) -> i32 {
        self.tt_next & TKEY_TAG_MASK
    }

    pub fn next(&self) -> i32 {
        self.tt_next >> TKEY_NEXT_SHIFT
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct LuaNode {
    pub val: TValue,
    pub key: TKey,
}

pub const LUA_NODE_SIZE_LOG2: u8 = 5;

#[repr(C)]
#[derive(Debug)]
pub struct Table {
    pub marked: u8,
    /// Bit `1 << event` set means the metatable is known to lack that event.
    pub tmcache: u8,
    pub readonly: u8,
    pub safeenv: u8,
    pub lsizenode: u8,
    /// `(1 << lsizenode) - 1` truncated to a byte, used with cached slots.
    pub nodemask8: u8,
    pub sizearray: i32,
    pub array: *mut TValue,
    pub node: *mut LuaNode,
    pub metatable: *mut Table,
    pub gclist: *mut c_void,
}

/// GC mark bit meaning "object already traversed".
pub const GC_BLACK_BIT: u8 = 2;

pub type CFunction = unsafe extern "C" fn(*mut VmState) -> i32;

#[repr(C)]
#[derive(Debug)]
pub struct Closure {
    pub marked: u8,
    /// Bit 0 set for foreign (non-VM) functions.
    pub is_c: u8,
    pub nupvalues: u8,
    pub stacksize: u8,
    pub env: *mut Table,
    pub proto: *mut Proto,
    pub cfunction: Option<CFunction>,
}

#[repr(C)]
#[derive(Debug)]
pub struct Proto {
    pub k: *mut TValue,
    pub code: *mut u32,
    /// Native metadata; null when the function has no compiled code.
    pub exec_data: *mut NativeProto,
    pub sizecode: i32,
    pub sizek: i32,
    pub numparams: u8,
    pub is_vararg: u8,
    pub maxstacksize: u8,
}

#[repr(C)]
#[derive(Debug)]
pub struct NativeProto {
    pub entry_target: *const u8,
    /// One absolute code address per instruction word.
    pub inst_targets: *const *const u8,
}

#[repr(C)]
#[derive(Debug)]
pub struct CallFrame {
    pub base: *mut TValue,
    pub func: *mut TValue,
    pub top: *mut TValue,
    /// Next instruction to execute when this frame resumes.
    pub savedpc: *const u32,
    pub prev: *mut CallFrame,
    pub nresults: i32,
    pub flags: u32,
}

/// Returning from this frame leaves native code entirely.
pub const FRAME_RETURN: u32 = 1;

pub type InterruptFn = unsafe extern "C" fn(*mut VmState, i32);

#[repr(C)]
#[derive(Debug)]
pub struct GlobalState {
    pub interrupt: Option<InterruptFn>,
    pub tmname: [*mut TString; tm::COUNT],
}

#[repr(C)]
#[derive(Debug)]
pub struct VmState {
    pub top: *mut TValue,
    pub base: *mut TValue,
    pub ci: *mut CallFrame,
    pub stack: *mut TValue,
    pub stack_last: *mut TValue,
    pub global: *mut GlobalState,
    /// Non-zero once the thread has yielded or errored.
    pub status: u8,
}

pub type FastFunction = unsafe extern "C" fn(
    *mut VmState,
    *mut TValue,
    *mut TValue,
    i32,
    *const TValue,
    i32,
) -> i32;

/// Runtime helpers reachable from the pinned native context register.
#[repr(C)]
pub struct NativeContext {
    /// `(L, func, argtop, nresults) -> callee`; pushes a frame for `func`.
    pub call_prolog:
        unsafe extern "C" fn(*mut VmState, *mut TValue, *mut TValue, i32) -> *mut Closure,
    /// `(L, nresults, produced)`; moves foreign results and pops the frame.
    pub call_epilog_c: unsafe extern "C" fn(*mut VmState, i32, i32),
    /// `(L, table, new_array_size)`; may run the garbage collector.
    pub resize_array: unsafe extern "C" fn(*mut VmState, *mut Table, i32),
    /// `(L, table, &table.gclist)`.
    pub barrier_back: unsafe extern "C" fn(*mut VmState, *mut Table, *mut *mut c_void),
    /// `(metatable, event, name) -> handler or null`.
    pub get_fast_tm: unsafe extern "C" fn(*mut Table, i32, *mut TString) -> *const TValue,
    /// `(L, table, index, ra) -> continue`; iterates the hash part.
    pub forg_loop_node_iter: unsafe extern "C" fn(*mut VmState, *mut Table, i32, *mut TValue) -> bool,
    /// `(L, ra, aux) -> continue`; iteration over non-table values.
    pub forg_loop_non_table_fallback: unsafe extern "C" fn(*mut VmState, i32, i32) -> bool,
    /// `(L, ra, pc)`; validates and prepares a generic-for iterator.
    pub forg_prep_fallback: unsafe extern "C" fn(*mut VmState, *mut TValue, i32),
    /// `(L, env, k, aux, propagate_nil)`; pushes the resolved value.
    pub get_import: unsafe extern "C" fn(*mut VmState, *mut Table, *mut TValue, u32, bool),
    pub fast_functions: [Option<FastFunction>; BUILTIN_COUNT],
}

pub mod tvalue {
    use super::*;
    pub const VALUE: i32 = offset_of!(TValue, value) as i32;
    pub const TT: i32 = offset_of!(TValue, tt) as i32;
}

pub mod tstring {
    use super::*;
    pub const HASH: i32 = offset_of!(TString, hash) as i32;
}

pub mod node {
    use super::*;
    pub const VAL: i32 = offset_of!(LuaNode, val) as i32;
    pub const KEY_VALUE: i32 = (offset_of!(LuaNode, key) + offset_of!(TKey, value)) as i32;
    pub const KEY_TT_NEXT: i32 = (offset_of!(LuaNode, key) + offset_of!(TKey, tt_next)) as i32;
}

pub mod table {
    use super::*;
    pub const MARKED: i32 = offset_of!(Table, marked) as i32;
    pub const TMCACHE: i32 = offset_of!(Table, tmcache) as i32;
    pub const SAFEENV: i32 = offset_of!(Table, safeenv) as i32;
    pub const LSIZENODE: i32 = offset_of!(Table, lsizenode) as i32;
    pub const NODEMASK8: i32 = offset_of!(Table, nodemask8) as i32;
    pub const SIZEARRAY: i32 = offset_of!(Table, sizearray) as i32;
    pub const ARRAY: i32 = offset_of!(Table, array) as i32;
    pub const NODE: i32 = offset_of!(Table, node) as i32;
    pub const METATABLE: i32 = offset_of!(Table, metatable) as i32;
    pub const GCLIST: i32 = offset_of!(Table, gclist) as i32;
}

pub mod closure {
    use super::*;
    pub const IS_C: i32 = offset_of!(Closure, is_c) as i32;
    pub const ENV: i32 = offset_of!(Closure, env) as i32;
    pub const PROTO: i32 = offset_of!(Closure, proto) as i32;
    pub const CFUNCTION: i32 = offset_of!(Closure, cfunction) as i32;
}

pub mod proto {
    use super::*;
    pub const K: i32 = offset_of!(Proto, k) as i32;
    pub const CODE: i32 = offset_of!(Proto, code) as i32;
    pub const EXEC_DATA: i32 = offset_of!(Proto, exec_data) as i32;
    pub const NUMPARAMS: i32 = offset_of!(Proto, numparams) as i32;
    pub const IS_VARARG: i32 = offset_of!(Proto, is_vararg) as i32;
}

pub mod native_proto {
    use super::*;
    pub const ENTRY_TARGET: i32 = offset_of!(NativeProto, entry_target) as i32;
    pub const INST_TARGETS: i32 = offset_of!(NativeProto, inst_targets) as i32;
}

pub mod frame {
    use super::*;
    pub const BASE: i32 = offset_of!(CallFrame, base) as i32;
    pub const FUNC: i32 = offset_of!(CallFrame, func) as i32;
    pub const TOP: i32 = offset_of!(CallFrame, top) as i32;
    pub const SAVEDPC: i32 = offset_of!(CallFrame, savedpc) as i32;
    pub const PREV: i32 = offset_of!(CallFrame, prev) as i32;
    pub const NRESULTS: i32 = offset_of!(CallFrame, nresults) as i32;
    pub const FLAGS: i32 = offset_of!(CallFrame, flags) as i32;
}

pub mod global {
    use super::*;
    pub const INTERRUPT: i32 = offset_of!(GlobalState, interrupt) as i32;
    pub const TMNAME: i32 = offset_of!(GlobalState, tmname) as i32;
}

pub mod state {
    use super::*;
    pub const TOP: i32 = offset_of!(VmState, top) as i32;
    pub const BASE: i32 = offset_of!(VmState, base) as i32;
    pub const CI: i32 = offset_of!(VmState, ci) as i32;
    pub const GLOBAL: i32 = offset_of!(VmState, global) as i32;
    pub const STATUS: i32 = offset_of!(VmState, status) as i32;
}

pub mod native {
    use super::*;
    pub const CALL_PROLOG: i32 = offset_of!(NativeContext, call_prolog) as i32;
    pub const CALL_EPILOG_C: i32 = offset_of!(NativeContext, call_epilog_c) as i32;
    pub const RESIZE_ARRAY: i32 = offset_of!(NativeContext, resize_array) as i32;
    pub const BARRIER_BACK: i32 = offset_of!(NativeContext, barrier_back) as i32;
    pub const GET_FAST_TM: i32 = offset_of!(NativeContext, get_fast_tm) as i32;
    pub const FORG_LOOP_NODE_ITER: i32 = offset_of!(NativeContext, forg_loop_node_iter) as i32;
    pub const FORG_LOOP_NON_TABLE_FALLBACK: i32 =
        offset_of!(NativeContext, forg_loop_non_table_fallback) as i32;
    pub const FORG_PREP_FALLBACK: i32 = offset_of!(NativeContext, forg_prep_fallback) as i32;
    pub const GET_IMPORT: i32 = offset_of!(NativeContext, get_import) as i32;
    pub const FAST_FUNCTIONS: i32 = offset_of!(NativeContext, fast_functions) as i32;

    /// Offset of the fast-function slot for builtin `id`.
    pub const fn fast_function(id: u8) -> i32 {
        FAST_FUNCTIONS + id as i32 * size_of::<usize>() as i32
    }
}

const _: () = assert!(size_of::<TValue>() == 1 << TVALUE_SIZE_LOG2);
const _: () = assert!(size_of::<LuaNode>() == 1 << LUA_NODE_SIZE_LOG2);
const _: () = assert!(size_of::<Option<FastFunction>>() == size_of::<usize>());

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tvalue_layout() {
        assert_eq!(TVALUE_SIZE, 16);
        assert_eq!(tvalue::VALUE, 0);
        assert_eq!(tvalue::TT, 12);
    }

    #[test]
    fn test_node_key_follows_value() {
        assert_eq!(node::VAL, 0);
        assert_eq!(node::KEY_VALUE, 16);
        assert_eq!(node::KEY_TT_NEXT, 28);
    }

    #[test]
    fn test_tkey_packing() {
        let key = TKey::new(tags::STRING, 0x1234, -3);
        assert_eq!(key.tt(), tags::STRING);
        assert_eq!(key.next(), -3);
    }

    #[test]
    fn test_falsy() {
        assert!(TValue::NIL.is_falsy());
        assert!(TValue::boolean(false).is_falsy());
        assert!(!TValue::boolean(true).is_falsy());
        assert!(!TValue::number(0.0).is_falsy());
    }

    #[test]
    fn test_fast_function_slots_are_pointer_sized() {
        assert_eq!(native::fast_function(1) - native::fast_function(0), 8);
        assert_eq!(native::fast_function(0), native::FAST_FUNCTIONS);
    }
}
