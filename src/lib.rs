mod chess;
