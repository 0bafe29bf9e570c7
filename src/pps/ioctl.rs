#![allow(non_camel_case_types)]

use libc::c_int;

use std::mem;

#[derive(Debug, Default)]
#[repr(C)]
pub struct data {
    pub info:    info,
    pub timeout: time,
}

#[derive(Debug, Default)]
#[repr(C)]
pub struct info {
    pub assert_sequence: u32,  // sequence number of assert event
    pub clear_sequence:  u32,  // sequence number of clear event
    pub assert_tu:       time, // time of assert event
    pub clear_tu:        time, // time of clear event
    pub current_mode:    i32,  // current mode
}

#[derive(Debug, Default)]
#[repr(C)]
pub struct params {
    pub api_version:   i32,   // API version
    pub mode:          i32,   // current mode
    pub assert_off_tu: time, // assert offset compensation
    pub clear_off_tu:  time, // clear offset compensation
}

#[derive(Debug, Default)]
#[repr(C)]
pub struct time {
    pub sec:   i64, // seconds
    pub nsec:  i32, // nanoseconds
    pub flags: u32, // flags
}

pub const TIME_INVALID: u32 = 1 << 0;

bitflags! {
    /// Mode and capability bits of the RFC 2783 API.
    pub struct Mode: i32 {
        const CAPTUREASSERT = 0x01;  // capture assert events
        const CAPTURECLEAR  = 0x02;  // capture clear events
        const OFFSETASSERT  = 0x10;  // apply compensation for assert event
        const OFFSETCLEAR   = 0x20;  // apply compensation for clear event
        const ECHOASSERT    = 0x40;  // feed back assert event to output
        const ECHOCLEAR     = 0x80;  // feed back clear event to output
        const CANWAIT       = 0x100; // can wait for an event
        const CANPOLL       = 0x200; // reserved
    }
}

pub const MAGIC: u8 = b'p';

pub const GETPARAMS: u8 = 0xa1;
pub const SETPARAMS: u8 = 0xa2;
pub const GETCAP:    u8 = 0xa3;
pub const FETCH:     u8 = 0xa4;

// The kernel's pps.h encodes pointer types in these requests, so the size
// baked into each number is the size of a pointer, not of the struct it
// points at.  nix's ioctl_read! family would encode the struct size and
// produce numbers the driver rejects.

pub unsafe fn getparams(fd: c_int, data: *mut params) -> nix::Result<c_int> {
    let res = libc::ioctl(
        fd,
        request_code_read!(MAGIC, GETPARAMS, mem::size_of::<*mut params>()),
        data,
    );
    nix::errno::Errno::result(res)
}

pub unsafe fn setparams(fd: c_int, data: *mut params) -> nix::Result<c_int> {
    let res = libc::ioctl(
        fd,
        request_code_write!(MAGIC, SETPARAMS, mem::size_of::<*mut params>()),
        data,
    );
    nix::errno::Errno::result(res)
}

pub unsafe fn getcap(fd: c_int, mode: *mut c_int) -> nix::Result<c_int> {
    let res = libc::ioctl(
        fd,
        request_code_read!(MAGIC, GETCAP, mem::size_of::<*mut c_int>()),
        mode,
    );
    nix::errno::Errno::result(res)
}

pub unsafe fn fetch(fd: c_int, data: *mut data) -> nix::Result<c_int> {
    let res = libc::ioctl(
        fd,
        request_code_readwrite!(MAGIC, FETCH, mem::size_of::<*mut data>()),
        data,
    );
    nix::errno::Errno::result(res)
}
